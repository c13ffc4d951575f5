//! Statement parsing.
//!
//! Consecutive statements without branches accumulate in a single block,
//! threaded through the cursor. Statements with branches allocate new
//! blocks and leave the cursor at the block where execution continues; after
//! `return`, `break`, or `continue` the cursor is a fresh orphan block, kept
//! because a later label could make it reachable.

use super::{Lexer, LoopTargets};
use crate::data::{
    ir::{BlockId, Op},
    types::Type,
    CompileResult, Keyword, SemanticError, SyntaxError, Token, Warning,
};
use crate::symbol::{Linkage, Symbol, SymbolKind};

impl<I: Lexer> super::Parser<I> {
    /// ```yacc
    /// compound_statement: '{' (declaration | statement)* '}' ;
    /// ```
    ///
    /// Declarations and statements interleave freely, as in modern C. The
    /// identifier and tag namespaces each get one scope.
    pub(crate) fn compound_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        self.expect(Token::LeftBrace)?;
        self.identifiers.push_scope();
        self.tags.push_scope();
        loop {
            match self.peek_token() {
                Some(Token::RightBrace) => break,
                Some(_) => self.statement(cursor)?,
                None => return Err(SyntaxError::EndOfInput("'}'").into()),
            }
        }
        self.expect(Token::RightBrace)?;
        self.tags.pop_scope();
        self.identifiers.pop_scope();
        Ok(())
    }

    /// Lower one statement into the graph, leaving the cursor at the block
    /// where execution continues.
    pub(crate) fn statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let _guard = self.recursion_check();
        match self.peek_token() {
            Some(Token::Semicolon) => {
                self.next_token();
                Ok(())
            }
            Some(Token::LeftBrace) => self.compound_statement(cursor),
            // switch lowers exactly like if: the body is entered when the
            // controlling expression is nonzero. case/default labels inside
            // are parsed and discarded.
            Some(Token::Keyword(Keyword::If)) | Some(Token::Keyword(Keyword::Switch)) => {
                self.if_statement(cursor)
            }
            Some(Token::Keyword(Keyword::While)) => self.while_statement(cursor),
            Some(Token::Keyword(Keyword::Do)) => self.do_statement(cursor),
            Some(Token::Keyword(Keyword::For)) => self.for_statement(cursor),
            Some(Token::Keyword(Keyword::Goto)) => {
                self.next_token();
                self.expect_id()?;
                self.expect(Token::Semicolon)?;
                self.error_handler.warn(Warning::Unimplemented("goto"));
                Ok(())
            }
            Some(Token::Keyword(Keyword::Break)) => self.loop_exit(cursor, "break"),
            Some(Token::Keyword(Keyword::Continue)) => self.loop_exit(cursor, "continue"),
            Some(Token::Keyword(Keyword::Return)) => self.return_statement(cursor),
            Some(Token::Keyword(Keyword::Case)) => {
                self.next_token();
                self.constant_expression()?;
                self.expect(Token::Colon)?;
                self.error_handler.warn(Warning::Unimplemented("case"));
                self.statement(cursor)
            }
            Some(Token::Keyword(Keyword::Default)) => {
                self.next_token();
                self.expect(Token::Colon)?;
                self.error_handler.warn(Warning::Unimplemented("default"));
                self.statement(cursor)
            }
            Some(&Token::Id(name)) => {
                // a label, a typedef'd declaration, or an expression
                if self.peek_next_token() == Some(&Token::Colon) {
                    self.next_token();
                    self.next_token();
                    self.labels.add(Symbol::new(
                        name,
                        Type::Void,
                        SymbolKind::Definition,
                        Linkage::None,
                    ))?;
                    self.error_handler.warn(Warning::Unimplemented("labels"));
                    return self.statement(cursor);
                }
                let is_typedef = self
                    .identifiers
                    .lookup(name)
                    .map_or(false, |id| id.map(|sym| sym.kind == SymbolKind::Typedef));
                if is_typedef {
                    self.declaration(cursor)
                } else {
                    self.expression_statement(cursor)
                }
            }
            Some(&Token::Keyword(keyword)) if keyword.is_decl_specifier() => {
                self.declaration(cursor)
            }
            _ => self.expression_statement(cursor),
        }
    }

    fn expression_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        self.expression(cursor)?;
        self.expect(Token::Semicolon)?;
        Ok(())
    }

    /// The parent block becomes a conditional branch: true enters the body,
    /// false falls through to the `else` arm or the merge block. Both arms
    /// rejoin at the merge block, which becomes the cursor.
    fn if_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let then_block = self.decl.new_block();
        let merge = self.decl.new_block();

        self.next_token();
        self.expect(Token::LeftParen)?;
        let condition = self.expression(cursor)?;
        self.expect(Token::RightParen)?;
        self.decl.block_mut(*cursor).expr = Some(condition);
        self.decl.block_mut(*cursor).jump = [Some(merge), Some(then_block)];

        let mut then_cursor = then_block;
        self.statement(&mut then_cursor)?;
        self.decl.block_mut(then_cursor).jump[0] = Some(merge);

        if self.match_next(&Token::Keyword(Keyword::Else)).is_some() {
            let else_block = self.decl.new_block();
            self.decl.block_mut(*cursor).jump[0] = Some(else_block);
            let mut else_cursor = else_block;
            self.statement(&mut else_cursor)?;
            self.decl.block_mut(else_cursor).jump[0] = Some(merge);
        }

        *cursor = merge;
        Ok(())
    }

    /// The top block evaluates the condition: true enters the body, false
    /// exits. The body's tail jumps back to the top.
    fn while_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let top = self.decl.new_block();
        let body = self.decl.new_block();
        let merge = self.decl.new_block();
        self.decl.block_mut(*cursor).jump[0] = Some(top);
        self.loops.push(LoopTargets {
            break_target: merge,
            continue_target: top,
        });

        self.next_token();
        self.expect(Token::LeftParen)?;
        let mut condition_cursor = top;
        let condition = self.expression(&mut condition_cursor)?;
        self.expect(Token::RightParen)?;
        self.decl.block_mut(condition_cursor).expr = Some(condition);
        self.decl.block_mut(condition_cursor).jump = [Some(merge), Some(body)];

        let mut body_cursor = body;
        self.statement(&mut body_cursor)?;
        self.decl.block_mut(body_cursor).jump[0] = Some(top);

        self.loops.pop();
        *cursor = merge;
        Ok(())
    }

    /// The top block is the body; its tail evaluates the condition and
    /// branches back to the top on true.
    fn do_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let top = self.decl.new_block();
        let merge = self.decl.new_block();
        self.decl.block_mut(*cursor).jump[0] = Some(top);
        self.loops.push(LoopTargets {
            break_target: merge,
            continue_target: top,
        });

        self.next_token();
        let mut body_cursor = top;
        self.statement(&mut body_cursor)?;
        self.expect(Token::Keyword(Keyword::While))?;
        self.expect(Token::LeftParen)?;
        let condition = self.expression(&mut body_cursor)?;
        self.expect(Token::RightParen)?;
        self.expect(Token::Semicolon)?;
        self.decl.block_mut(body_cursor).expr = Some(condition);
        self.decl.block_mut(body_cursor).jump = [Some(merge), Some(top)];

        self.loops.pop();
        *cursor = merge;
        Ok(())
    }

    /// Init code lands in the parent block; the condition gets the top
    /// block (an omitted condition means no branch at all); the increment
    /// expression lives in its own block that jumps back to the top, and
    /// `continue` targets it.
    fn for_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let top = self.decl.new_block();
        let body = self.decl.new_block();
        let increment = self.decl.new_block();
        let merge = self.decl.new_block();
        self.loops.push(LoopTargets {
            break_target: merge,
            continue_target: increment,
        });

        self.next_token();
        self.expect(Token::LeftParen)?;
        if self.peek_token() != Some(&Token::Semicolon) {
            self.expression(cursor)?;
        }
        self.expect(Token::Semicolon)?;

        // where the back edges land: the condition if there is one, else
        // straight back into the body
        let loop_top;
        if self.peek_token() != Some(&Token::Semicolon) {
            self.decl.block_mut(*cursor).jump[0] = Some(top);
            let mut condition_cursor = top;
            let condition = self.expression(&mut condition_cursor)?;
            self.decl.block_mut(condition_cursor).expr = Some(condition);
            self.decl.block_mut(condition_cursor).jump = [Some(merge), Some(body)];
            loop_top = top;
        } else {
            self.decl.block_mut(*cursor).jump[0] = Some(body);
            loop_top = body;
        }
        self.expect(Token::Semicolon)?;

        if self.peek_token() != Some(&Token::RightParen) {
            let mut increment_cursor = increment;
            self.expression(&mut increment_cursor)?;
            self.decl.block_mut(increment_cursor).jump[0] = Some(loop_top);
        } else {
            self.decl.block_mut(increment).jump[0] = Some(loop_top);
        }
        self.expect(Token::RightParen)?;

        let mut body_cursor = body;
        self.statement(&mut body_cursor)?;
        self.decl.block_mut(body_cursor).jump[0] = Some(increment);

        self.loops.pop();
        *cursor = merge;
        Ok(())
    }

    /// `break` and `continue` jump to the innermost loop's exit or
    /// top/increment block. The cursor moves to an orphan block, dead code
    /// unless a label later reaches it.
    fn loop_exit(&mut self, cursor: &mut BlockId, which: &'static str) -> CompileResult<()> {
        self.next_token();
        let targets = *self
            .loops
            .last()
            .ok_or(SemanticError::NotInLoop(which))?;
        let target = if which == "continue" {
            targets.continue_target
        } else {
            targets.break_target
        };
        self.decl.block_mut(*cursor).jump[0] = Some(target);
        self.expect(Token::Semicolon)?;
        *cursor = self.decl.new_block();
        Ok(())
    }

    fn return_statement(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        self.next_token();
        let op = if self.peek_token() != Some(&Token::Semicolon) {
            let value = self.expression(cursor)?;
            let return_type = self.decl.fun.and_then(|fun| match fun.ctype() {
                Type::Function(ftype) => Some(*ftype.return_type),
                _ => None,
            });
            let value = match return_type {
                Some(ctype) if ctype != Type::Void => {
                    self.eval().convert(*cursor, value, &ctype)?
                }
                _ => self.eval().rvalue(*cursor, value)?,
            };
            Op::Return(Some(value))
        } else {
            Op::Return(None)
        };
        self.expect(Token::Semicolon)?;
        self.decl.push_op(*cursor, op);
        *cursor = self.decl.new_block();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::data::ir::{Decl, Op, Value};
    use crate::data::{Error, SemanticError, Warning};
    use crate::parse::test::{parse_all, parser};

    fn function(input: &str) -> Decl {
        let mut p = parser(input);
        let fragment = p.parse_next().unwrap().unwrap();
        assert!(fragment.fun.is_some(), "expected a function definition");
        fragment
    }

    #[test]
    fn if_else_rejoins() {
        let f = function("int f(int x) { int r; if (x) r = 1; else r = 2; return r; }");
        let body = f.block(f.body);
        let [else_block, then_block] = body.jump;
        let (else_block, then_block) = (else_block.unwrap(), then_block.unwrap());
        assert!(body.expr.is_some(), "branch must carry its condition");
        // both arms end at the same merge block
        assert_eq!(
            f.block(then_block).jump[0],
            f.block(else_block).jump[0]
        );
        let merge = f.block(then_block).jump[0].unwrap();
        assert!(matches!(f.block(merge).ops[..], [Op::Return(Some(_))]));
    }

    #[test]
    fn if_without_else_falls_through() {
        let f = function("int f(int x) { if (x) x = 0; return x; }");
        let body = f.block(f.body);
        let [merge, then_block] = body.jump;
        // false goes straight to the merge block
        assert_eq!(f.block(then_block.unwrap()).jump[0], merge);
    }

    #[test]
    fn while_loop_shape() {
        let f = function("int f(int x) { while (x) x = x - 1; return x; }");
        let body = f.block(f.body);
        let top = body.jump[0].unwrap();
        assert_eq!(body.jump[1], None);
        let condition = f.block(top);
        let [merge, loop_body] = condition.jump;
        assert!(condition.expr.is_some());
        // the body's tail loops back to the condition
        assert_eq!(f.block(loop_body.unwrap()).jump[0], Some(top));
        assert!(matches!(
            f.block(merge.unwrap()).ops[..],
            [Op::Return(Some(_))]
        ));
    }

    #[test]
    fn do_while_tests_after_body() {
        let f = function("int f(int x) { do x = x - 1; while (x); return x; }");
        let body = f.block(f.body);
        let top = body.jump[0].unwrap();
        let tail = f.block(top);
        // the body block itself ends in the conditional branch: true loops
        assert_eq!(tail.jump[1], Some(top));
        assert!(tail.jump[0].is_some());
        assert!(!tail.ops.is_empty());
    }

    #[test]
    fn for_loop_shape() {
        // init lands in the entry; condition, body, and increment each get
        // their own block; the increment jumps back to the condition
        let f = function(
            "int f(void) { int i; int s; s = 0; for (i = 0; i < 10; i++) s = s + i; return s; }",
        );
        let entry = f.block(f.body);
        // init: s = 0 and i = 0 both in the entry block
        assert!(entry.ops.len() >= 2);
        let condition = entry.jump[0].unwrap();
        assert_eq!(entry.jump[1], None);
        let [merge, body] = f.block(condition).jump;
        assert!(f.block(condition).expr.is_some());
        let increment = f.block(body.unwrap()).jump[0].unwrap();
        assert_ne!(increment, condition);
        // increment loops back to the condition
        assert_eq!(f.block(increment).jump[0], Some(condition));
        assert!(f
            .block(increment)
            .ops
            .iter()
            .any(|op| matches!(op, Op::Binary { .. })));
        assert!(matches!(
            f.block(merge.unwrap()).ops[..],
            [Op::Return(Some(_))]
        ));
    }

    #[test]
    fn infinite_for_loop_has_no_branch() {
        let f = function("int f(void) { for (;;) ; return 0; }");
        let entry = f.block(f.body);
        let body = entry.jump[0].unwrap();
        // no condition block: the body jumps to the increment, which jumps
        // straight back to the body
        let increment = f.block(body).jump[0].unwrap();
        assert_eq!(f.block(increment).jump[0], Some(body));
        assert_eq!(f.block(body).jump[1], None);
    }

    #[test]
    fn break_and_continue_target_the_loop() {
        let f = function("int f(int x) { while (1) { if (x) break; continue; } return x; }");
        // find the block that the while condition branches to on true
        let top = f.block(f.body).jump[0].unwrap();
        let [merge, loop_body] = f.block(top).jump;
        let (merge, loop_body) = (merge.unwrap(), loop_body.unwrap());
        // the if-true arm inside the body jumps to the loop exit
        let if_then = f.block(loop_body).jump[1].unwrap();
        assert_eq!(f.block(if_then).jump[0], Some(merge));
        // the fall-through arm continues to the loop top
        let if_merge = f.block(loop_body).jump[0].unwrap();
        assert_eq!(f.block(if_merge).jump[0], Some(top));
    }

    #[test]
    fn break_outside_loop_is_fatal() {
        assert_eq!(
            parse_all("int f(void) { break; return 0; }"),
            Err(SemanticError::NotInLoop("break").into())
        );
        assert_eq!(
            parse_all("int f(void) { continue; return 0; }"),
            Err(SemanticError::NotInLoop("continue").into())
        );
    }

    #[test]
    fn nested_loops_restore_targets() {
        let f = function(
            "int f(int x) {
                while (x) {
                    while (x) { break; }
                    x = x - 1;
                }
                return x;
            }",
        );
        // outer loop: body tail must still jump back to the outer condition
        let outer_top = f.block(f.body).jump[0].unwrap();
        let outer_body = f.block(outer_top).jump[1].unwrap();
        // walk the chain of the outer body to its tail
        let mut tail = outer_body;
        let mut steps = 0;
        while let Some(next) = f.block(tail).jump[0] {
            if next == outer_top {
                break;
            }
            tail = next;
            steps += 1;
            assert!(steps < 32, "runaway chain");
        }
        assert_eq!(f.block(tail).jump[0], Some(outer_top));
    }

    #[test]
    fn code_after_return_is_an_orphan() {
        let f = function("int f(void) { return 0; 1; }");
        let reachable = f.reachable();
        // the orphan holding `1;` exists but is unreachable
        assert!(f.blocks().count() > reachable.len());
        // every reachable successor block terminates or jumps
        for id in reachable {
            let block = f.block(id);
            let terminates = block.jump.iter().any(Option::is_some)
                || matches!(block.ops.last(), Some(Op::Return(_)))
                || id == f.head;
            assert!(terminates || id == f.body, "unterminated block {}", block.label);
        }
    }

    #[test]
    fn declarations_emit_into_current_block() {
        let f = function("int f(void) { int x = 2; return x; }");
        let entry = f.block(f.body);
        assert!(matches!(
            &entry.ops[0],
            Op::Assign { src, .. } if src.value() == Some(&Value::Int(2))
        ));
    }

    #[test]
    fn static_locals_initialize_in_head() {
        let f = function("int f(void) { static int x = 2; return x; }");
        let head = f.block(f.head);
        // __func__ plus the static initializer
        assert_eq!(head.ops.len(), 2);
        assert!(matches!(
            &head.ops[1],
            Op::Assign { src, .. } if src.value() == Some(&Value::Int(2))
        ));
        // and the entry block holds only the return
        assert!(matches!(f.block(f.body).ops[..], [Op::Return(Some(_))]));
    }

    #[test]
    fn func_dunder_is_defined() {
        let f = function("int f(void) { return 0; }");
        let head = f.block(f.head);
        match &head.ops[0] {
            Op::Assign { dst, src } => {
                assert_eq!(
                    dst.symbol().map(|sym| sym.name()),
                    Some("__func__".into())
                );
                match src.value() {
                    Some(Value::Str(label)) => assert_eq!(label.resolve_and_clone(), "f"),
                    other => panic!("expected string, got {:?}", other),
                }
                // the array covers the name plus its NUL
                assert_eq!(src.ctype.size(), 2);
            }
            other => panic!("expected __func__ definition, got {}", other),
        }
    }

    #[test]
    fn func_dunder_resolves_in_body() {
        let f = function("int f(void) { return sizeof __func__; }");
        assert!(matches!(
            f.block(f.body).ops[..],
            [Op::Return(Some(ref v))] if v.value() == Some(&Value::Int(2))
        ));
    }

    #[test]
    fn typedef_statement_disambiguation() {
        // T is a typedef, so `T x = 1;` inside the body is a declaration
        let f = function("typedef int T; int f(void) { T x = 1; return x; }");
        let entry = f.block(f.body);
        assert!(matches!(
            &entry.ops[0],
            Op::Assign { src, .. } if src.value() == Some(&Value::Int(1))
        ));
    }

    #[test]
    fn shadowing_in_inner_scope() {
        let f = function("int f(void) { int x = 1; { int x = 2; x = 3; } return x; }");
        let ops = &f.block(f.body).ops;
        // four assignments, two different `x` symbols
        let symbols: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Assign { dst, .. } => dst.symbol(),
                _ => None,
            })
            .collect();
        assert_eq!(symbols.len(), 3);
        assert_ne!(symbols[0], symbols[1]);
        assert_eq!(symbols[1], symbols[2]);
    }

    #[test]
    fn labels_and_gotos_parse_as_noops() {
        let mut p = parser("int f(int x) { top: if (x) goto top; return 0; }");
        let fragment = p.parse_next().unwrap().unwrap();
        assert!(fragment.fun.is_some());
        let warnings = p.warnings();
        assert!(warnings.contains(&Warning::Unimplemented("labels")));
        assert!(warnings.contains(&Warning::Unimplemented("goto")));
    }

    #[test]
    fn duplicate_label_is_fatal() {
        assert!(matches!(
            parse_all("int f(void) { top: ; top: ; return 0; }"),
            Err(Error::Semantic(SemanticError::BlockRedeclaration(_)))
        ));
    }

    #[test]
    fn switch_parses_as_conditional(){
        let f = function(
            "int f(int x) { switch (x) { case 1: return 1; default: return 0; } return 2; }",
        );
        let body = f.block(f.body);
        // lowered like if: both edges set, condition present
        assert!(body.jump[0].is_some() && body.jump[1].is_some());
    }

    #[test]
    fn locals_and_params_are_recorded() {
        let f = function("int f(int a, int b) { int c; return a + b; }");
        assert_eq!(f.params.len(), 2);
        // c plus the temporary for a + b
        assert!(!f.locals.is_empty());
    }
}
