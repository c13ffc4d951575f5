//! The expression grammar.
//!
//! Each rule takes a block cursor and returns the [`Var`] holding the
//! expression's value; lowering is a side effect on the fragment under
//! construction. Straight-line operators emit into the cursor's block; the
//! short-circuit and conditional operators grow the graph, so the cursor
//! they leave behind is the merge block where evaluation continues.

use super::Lexer;
use crate::data::{
    ir::{BinaryOp, BlockId, Var},
    types::Type,
    ComparisonToken, CompileResult, Keyword, SemanticError, SyntaxError, Token,
};
use crate::eval::usual_arithmetic_conversions;
use crate::intern::InternedStr;
use crate::symbol::SymbolKind;

impl<I: Lexer> super::Parser<I> {
    /// ```yacc
    /// expression: assignment_expression (',' assignment_expression)* ;
    /// ```
    pub(crate) fn expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.assignment_expression(cursor)?;
        while self.match_next(&Token::Comma).is_some() {
            value = self.assignment_expression(cursor)?;
        }
        self.decl.block_mut(*cursor).expr = Some(value.clone());
        Ok(value)
    }

    /// ```yacc
    /// assignment_expression
    /// : conditional_expression
    /// | conditional_expression '=' assignment_expression
    /// ;
    /// ```
    ///
    /// Any expression is accepted on the left; `eval` rejects targets that
    /// are not lvalues. Compound assignment is not recognized.
    pub(crate) fn assignment_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let target = self.conditional_expression(cursor)?;
        if self.match_next(&Token::Equal).is_some() {
            let value = self.assignment_expression(cursor)?;
            return self.eval().assign(*cursor, target, value);
        }
        Ok(target)
    }

    /// ```yacc
    /// conditional_expression
    /// : logical_or_expression
    /// | logical_or_expression '?' expression ':' conditional_expression
    /// ;
    /// ```
    ///
    /// `? :` lowers the same way the short-circuit operators do: both arms
    /// assign into a shared temporary and rejoin at a merge block.
    pub(crate) fn conditional_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let condition = self.logical_or_expression(cursor)?;
        if self.match_next(&Token::Question).is_none() {
            return Ok(condition);
        }

        let then_block = self.decl.new_block();
        let else_block = self.decl.new_block();
        let merge = self.decl.new_block();
        self.decl.block_mut(*cursor).expr = Some(condition);
        self.decl.block_mut(*cursor).jump = [Some(else_block), Some(then_block)];

        let mut then_cursor = then_block;
        let then_value = self.expression(&mut then_cursor)?;
        self.expect(Token::Colon)?;
        let mut else_cursor = else_block;
        let else_value = self.conditional_expression(&mut else_cursor)?;

        let ctype = usual_arithmetic_conversions(&then_value.ctype, &else_value.ctype)
            .unwrap_or_else(|| then_value.ctype.clone());
        let result = Var::direct(self.eval().temp(ctype));
        self.eval().assign(then_cursor, result.clone(), then_value)?;
        self.eval().assign(else_cursor, result.clone(), else_value)?;
        self.decl.block_mut(then_cursor).jump[0] = Some(merge);
        self.decl.block_mut(else_cursor).jump[0] = Some(merge);

        *cursor = merge;
        let result = result.rvalue();
        self.decl.block_mut(merge).expr = Some(result.clone());
        Ok(result)
    }

    /// `a || b`: evaluate `a` into a result temporary; on true skip straight
    /// to the merge block, otherwise evaluate `b` and fold it in.
    fn logical_or_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.logical_and_expression(cursor)?;
        if self.peek_token() != Some(&Token::LogicalOr) {
            return Ok(value);
        }

        let result = Var::direct(self.eval().temp(Type::int()));
        self.eval().assign(*cursor, result.clone(), value.clone())?;
        let merge = self.decl.new_block();

        while self.match_next(&Token::LogicalOr).is_some() {
            let next = self.decl.new_block();
            self.decl.block_mut(*cursor).expr = Some(value.clone());
            self.decl.block_mut(*cursor).jump = [Some(next), Some(merge)];

            let mut next_cursor = next;
            let rhs = self.logical_and_expression(&mut next_cursor)?;
            let combined = self
                .eval()
                .expr(next_cursor, BinaryOp::LogicalOr, value, rhs)?;
            self.eval().assign(next_cursor, result.clone(), combined.clone())?;
            value = combined;
            *cursor = next_cursor;
        }

        self.decl.block_mut(*cursor).jump[0] = Some(merge);
        *cursor = merge;
        let result = result.rvalue();
        self.decl.block_mut(merge).expr = Some(result.clone());
        Ok(result)
    }

    /// `a && b`: like `||`, with the branch polarity flipped.
    fn logical_and_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.inclusive_or_expression(cursor)?;
        if self.peek_token() != Some(&Token::LogicalAnd) {
            return Ok(value);
        }

        let result = Var::direct(self.eval().temp(Type::int()));
        self.eval().assign(*cursor, result.clone(), value.clone())?;
        let merge = self.decl.new_block();

        while self.match_next(&Token::LogicalAnd).is_some() {
            let next = self.decl.new_block();
            self.decl.block_mut(*cursor).expr = Some(value.clone());
            self.decl.block_mut(*cursor).jump = [Some(merge), Some(next)];

            let mut next_cursor = next;
            let rhs = self.inclusive_or_expression(&mut next_cursor)?;
            let combined = self
                .eval()
                .expr(next_cursor, BinaryOp::LogicalAnd, value, rhs)?;
            self.eval().assign(next_cursor, result.clone(), combined.clone())?;
            value = combined;
            *cursor = next_cursor;
        }

        self.decl.block_mut(*cursor).jump[0] = Some(merge);
        *cursor = merge;
        let result = result.rvalue();
        self.decl.block_mut(merge).expr = Some(result.clone());
        Ok(result)
    }

    fn inclusive_or_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.exclusive_or_expression(cursor)?;
        while self.match_next(&Token::BitwiseOr).is_some() {
            let rhs = self.exclusive_or_expression(cursor)?;
            value = self.eval().expr(*cursor, BinaryOp::BitOr, value, rhs)?;
        }
        Ok(value)
    }

    fn exclusive_or_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.and_expression(cursor)?;
        while self.match_next(&Token::Xor).is_some() {
            let rhs = self.and_expression(cursor)?;
            value = self.eval().expr(*cursor, BinaryOp::Xor, value, rhs)?;
        }
        Ok(value)
    }

    fn and_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.equality_expression(cursor)?;
        while self.match_next(&Token::Ampersand).is_some() {
            let rhs = self.equality_expression(cursor)?;
            value = self.eval().expr(*cursor, BinaryOp::BitAnd, value, rhs)?;
        }
        Ok(value)
    }

    /// `!=` has no operator of its own: `a != b` is `(a == b) == 0`.
    fn equality_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.relational_expression(cursor)?;
        loop {
            if self
                .match_next(&Token::Comparison(ComparisonToken::EqualEqual))
                .is_some()
            {
                let rhs = self.relational_expression(cursor)?;
                value = self.eval().expr(*cursor, BinaryOp::Eq, value, rhs)?;
            } else if self
                .match_next(&Token::Comparison(ComparisonToken::NotEqual))
                .is_some()
            {
                let rhs = self.relational_expression(cursor)?;
                let equal = self.eval().expr(*cursor, BinaryOp::Eq, value, rhs)?;
                value = self
                    .eval()
                    .expr(*cursor, BinaryOp::Eq, Var::int(0), equal)?;
            } else {
                return Ok(value);
            }
        }
    }

    /// Only `>` and `>=` exist in the IR; `<` and `<=` swap their operands.
    fn relational_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        use ComparisonToken::*;
        let mut value = self.shift_expression(cursor)?;
        loop {
            let (op, swap) = match self.peek_token() {
                Some(Token::Comparison(Less)) => (BinaryOp::Gt, true),
                Some(Token::Comparison(Greater)) => (BinaryOp::Gt, false),
                Some(Token::Comparison(LessEqual)) => (BinaryOp::Ge, true),
                Some(Token::Comparison(GreaterEqual)) => (BinaryOp::Ge, false),
                _ => return Ok(value),
            };
            self.next_token();
            let rhs = self.shift_expression(cursor)?;
            value = if swap {
                self.eval().expr(*cursor, op, rhs, value)?
            } else {
                self.eval().expr(*cursor, op, value, rhs)?
            };
        }
    }

    fn shift_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.additive_expression(cursor)?;
        loop {
            let op = match self.peek_token() {
                Some(Token::ShiftLeft) => BinaryOp::Shl,
                Some(Token::ShiftRight) => BinaryOp::Shr,
                _ => return Ok(value),
            };
            self.next_token();
            let rhs = self.additive_expression(cursor)?;
            value = self.eval().expr(*cursor, op, value, rhs)?;
        }
    }

    fn additive_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.multiplicative_expression(cursor)?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(value),
            };
            self.next_token();
            let rhs = self.multiplicative_expression(cursor)?;
            value = self.eval().expr(*cursor, op, value, rhs)?;
        }
    }

    fn multiplicative_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut value = self.cast_expression(cursor)?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Divide) => BinaryOp::Div,
                Some(Token::Mod) => BinaryOp::Mod,
                _ => return Ok(value),
            };
            self.next_token();
            let rhs = self.cast_expression(cursor)?;
            value = self.eval().expr(*cursor, op, value, rhs)?;
        }
    }

    /// ```yacc
    /// cast_expression
    /// : unary_expression
    /// | '(' type_name ')' cast_expression
    /// ;
    /// ```
    ///
    /// This rule needs two tokens of lookahead, to see past the opening
    /// parenthesis and tell a cast from a parenthesized expression.
    fn cast_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let _guard = self.recursion_check();
        if self.peek_token() == Some(&Token::LeftParen) && self.lookahead_is_type_name() {
            self.expect(Token::LeftParen)?;
            let ctype = match self.type_name()? {
                Some(ctype) => ctype,
                None => {
                    let got = self.peek_token().cloned();
                    return Err(match got {
                        Some(got) => SyntaxError::ExpectedType(got).into(),
                        None => SyntaxError::EndOfInput("a type name").into(),
                    });
                }
            };
            self.expect(Token::RightParen)?;
            let value = self.cast_expression(cursor)?;
            return self.eval().cast(*cursor, value, ctype);
        }
        self.unary_expression(cursor)
    }

    /// Whether the token after the current `(` begins a type-name.
    fn lookahead_is_type_name(&mut self) -> bool {
        match self.peek_next_token() {
            Some(&Token::Keyword(keyword)) => keyword.starts_type_name(),
            Some(&Token::Id(name)) => match self.identifiers.lookup(name) {
                Some(id) => id.map(|sym| sym.kind == SymbolKind::Typedef),
                None => false,
            },
            _ => false,
        }
    }

    /// ```yacc
    /// unary_expression
    /// : postfix_expression
    /// | ('&' | '*' | '!' | '+' | '-' | '~') cast_expression
    /// | ('++' | '--') unary_expression
    /// | sizeof unary_expression
    /// | sizeof '(' type_name ')'
    /// ;
    /// ```
    fn unary_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        match self.peek_token() {
            Some(Token::Ampersand) => {
                self.next_token();
                let value = self.cast_expression(cursor)?;
                self.eval().addr(*cursor, value)
            }
            Some(Token::Star) => {
                self.next_token();
                let value = self.cast_expression(cursor)?;
                self.eval().deref(*cursor, value)
            }
            Some(Token::LogicalNot) => {
                self.next_token();
                let value = self.cast_expression(cursor)?;
                self.eval().expr(*cursor, BinaryOp::Eq, Var::int(0), value)
            }
            Some(Token::Plus) => {
                // unary plus only strips lvalue-ness
                self.next_token();
                let value = self.cast_expression(cursor)?;
                Ok(value.rvalue())
            }
            Some(Token::Minus) => {
                self.next_token();
                let value = self.cast_expression(cursor)?;
                self.eval().expr(*cursor, BinaryOp::Sub, Var::int(0), value)
            }
            Some(Token::BinaryNot) => {
                self.next_token();
                let value = self.cast_expression(cursor)?;
                self.eval().expr(*cursor, BinaryOp::Xor, value, Var::int(-1))
            }
            Some(Token::Keyword(Keyword::Sizeof)) => {
                self.next_token();
                let ctype = self.sizeof_operand()?;
                if ctype.is_function() {
                    return Err(SemanticError::SizeofFunction.into());
                }
                if !ctype.is_complete() {
                    return Err(SemanticError::SizeofIncomplete(ctype).into());
                }
                Ok(Var::int(ctype.size() as i64))
            }
            Some(Token::PlusPlus) => {
                self.next_token();
                let target = self.unary_expression(cursor)?;
                let sum = self
                    .eval()
                    .expr(*cursor, BinaryOp::Add, target.clone(), Var::int(1))?;
                self.eval().assign(*cursor, target, sum)
            }
            Some(Token::MinusMinus) => {
                self.next_token();
                let target = self.unary_expression(cursor)?;
                let difference =
                    self.eval()
                        .expr(*cursor, BinaryOp::Sub, target.clone(), Var::int(1))?;
                self.eval().assign(*cursor, target, difference)
            }
            _ => self.postfix_expression(cursor),
        }
    }

    /// The operand of `sizeof`: either a parenthesized type-name, or an
    /// expression evaluated into a scratch block purely for its type; the
    /// operand is not executed.
    fn sizeof_operand(&mut self) -> CompileResult<Type> {
        if self.peek_token() == Some(&Token::LeftParen) && self.lookahead_is_type_name() {
            self.expect(Token::LeftParen)?;
            let ctype = match self.type_name()? {
                Some(ctype) => ctype,
                None => {
                    let got = self.peek_token().cloned();
                    return Err(match got {
                        Some(got) => SyntaxError::ExpectedType(got).into(),
                        None => SyntaxError::EndOfInput("a type name").into(),
                    });
                }
            };
            self.expect(Token::RightParen)?;
            Ok(ctype)
        } else {
            let mut scratch = self.decl.new_block();
            let value = self.unary_expression(&mut scratch)?;
            Ok(value.ctype)
        }
    }

    /// ```yacc
    /// postfix_expression
    /// : primary_expression
    /// | postfix_expression '[' expression ']'
    /// | postfix_expression '(' argument_list? ')'
    /// | postfix_expression ('.' | '->') IDENTIFIER
    /// | postfix_expression ('++' | '--')
    /// ;
    /// ```
    fn postfix_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        let mut root = self.primary_expression(cursor)?;
        loop {
            root = match self.peek_token() {
                Some(Token::LeftBracket) => {
                    // a[b] is *(a + b); pointer arithmetic takes care of
                    // scaling b by the element width
                    self.next_token();
                    let index = self.expression(cursor)?;
                    let sum = self.eval().expr(*cursor, BinaryOp::Add, root, index)?;
                    self.expect(Token::RightBracket)?;
                    self.eval().deref(*cursor, sum)?
                }
                Some(Token::LeftParen) => {
                    self.next_token();
                    self.call_expression(cursor, root)?
                }
                Some(Token::Dot) => {
                    self.next_token();
                    let member = self.expect_id()?;
                    let base = self.eval().addr(*cursor, root)?;
                    self.member_access(cursor, base, member)?
                }
                Some(Token::StructDeref) => {
                    self.next_token();
                    let member = self.expect_id()?;
                    self.member_access(cursor, root, member)?
                }
                Some(Token::PlusPlus) => {
                    self.next_token();
                    let copy = self.eval().copy(*cursor, root.clone())?;
                    let sum = self
                        .eval()
                        .expr(*cursor, BinaryOp::Add, root.clone(), Var::int(1))?;
                    self.eval().assign(*cursor, root, sum)?;
                    copy
                }
                Some(Token::MinusMinus) => {
                    self.next_token();
                    let copy = self.eval().copy(*cursor, root.clone())?;
                    let difference = self
                        .eval()
                        .expr(*cursor, BinaryOp::Sub, root.clone(), Var::int(1))?;
                    self.eval().assign(*cursor, root, difference)?;
                    copy
                }
                _ => {
                    self.decl.block_mut(*cursor).expr = Some(root.clone());
                    return Ok(root);
                }
            };
        }
    }

    /// Arguments for a call: exactly the declared parameters, plus anything
    /// extra for a varargs function. Each argument becomes a `Param` op in
    /// evaluation order, then the `Call` consumes them.
    fn call_expression(&mut self, cursor: &mut BlockId, func: Var) -> CompileResult<Var> {
        let ftype = match &func.ctype {
            Type::Function(ftype) => ftype.clone(),
            _ => return Err(SemanticError::NotAFunction(func.ctype.clone()).into()),
        };
        let name = func
            .symbol()
            .map(|sym| sym.name())
            .unwrap_or_default();

        let mut args = Vec::new();
        for i in 0..ftype.params.len() {
            if self.peek_token() == Some(&Token::RightParen) {
                return Err(SemanticError::TooFewArguments(name, ftype.params.len()).into());
            }
            args.push(self.assignment_expression(cursor)?);
            if i + 1 < ftype.params.len() {
                self.expect(Token::Comma)?;
            }
        }
        while ftype.varargs && self.peek_token() != Some(&Token::RightParen) {
            self.expect(Token::Comma)?;
            args.push(self.assignment_expression(cursor)?);
        }
        self.expect(Token::RightParen)?;

        for arg in args {
            self.eval().param(*cursor, arg)?;
        }
        self.eval().call(*cursor, func)
    }

    /// Shared tail of `.` and `->`: `base` is a pointer to an object type,
    /// and the result is an lvalue for the named member, offset into the
    /// pointed-to storage.
    fn member_access(
        &mut self,
        cursor: &mut BlockId,
        base: Var,
        member_name: InternedStr,
    ) -> CompileResult<Var> {
        let object = match &base.ctype {
            Type::Pointer(to, _) if to.is_object() => (**to).clone(),
            _ => return Err(SemanticError::NotAnObject(base.ctype.clone()).into()),
        };
        let def = object.object().expect("checked above");
        let member = def
            .members
            .iter()
            .find(|member| member.name == member_name)
            .ok_or_else(|| SemanticError::NoSuchMember(member_name, object.clone()))?;

        let mut var = self.eval().deref(*cursor, base)?;
        var.ctype = member.ctype.clone();
        if let crate::data::VarKind::Deref { offset, .. } = &mut var.kind {
            *offset += member.offset;
        }
        var.lvalue = true;
        Ok(var)
    }

    /// ```yacc
    /// primary_expression
    /// : IDENTIFIER | INTEGER | STRING | '(' expression ')'
    /// ;
    /// ```
    fn primary_expression(&mut self, cursor: &mut BlockId) -> CompileResult<Var> {
        match self.next_token() {
            Some(Token::Id(name)) => match self.identifiers.lookup(name) {
                Some(id) => Ok(Var::direct(id)),
                None => Err(SemanticError::UndefinedSymbol(name).into()),
            },
            Some(Token::Int(value)) => Ok(Var::int(value)),
            Some(Token::Str(string)) => Ok(Var::string(string, string.len() as u64 + 1)),
            Some(Token::LeftParen) => {
                let value = self.expression(cursor)?;
                self.expect(Token::RightParen)?;
                Ok(value)
            }
            Some(other) => Err(SyntaxError::NotAPrimary(other).into()),
            None => Err(SyntaxError::EndOfInput("an expression").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::data::ir::{BinaryOp, Decl, Op, Value, VarKind};
    use crate::data::{Error, SemanticError};
    use crate::parse::test::{parse_all, parser};

    /// Parse one function and render every reachable op, in block order.
    fn body_ops(input: &str) -> Vec<String> {
        let mut p = parser(input);
        let fragment = p.parse_next().unwrap().unwrap().unwrap_function();
        let mut ops = Vec::new();
        for id in fragment.reachable() {
            if id == fragment.head {
                continue;
            }
            for op in &fragment.block(id).ops {
                ops.push(op.to_string());
            }
        }
        ops
    }

    trait UnwrapFunction {
        fn unwrap_function(self) -> Decl;
    }
    impl UnwrapFunction for Decl {
        fn unwrap_function(self) -> Decl {
            assert!(self.fun.is_some(), "expected a function fragment");
            self
        }
    }

    #[test]
    fn subscript_is_pointer_arithmetic() {
        // a[b] and *(a + b) produce the same operations
        assert_eq!(
            body_ops("int f(int *p) { return p[2]; }"),
            body_ops("int f(int *p) { return *(p + 2); }")
        );
    }

    #[test]
    fn subscript_scales_by_element_size() {
        let ops = body_ops("int f(int *p) { return p[2]; }");
        assert!(
            ops[0].contains("p + 8"),
            "index 2 should scale to byte offset 8: {:?}",
            ops
        );
    }

    #[test]
    fn constant_expressions_fold() {
        let ops = body_ops("int f(void) { return 2 * 3 + 10 % 4; }");
        assert_eq!(ops, vec!["return 8"]);
    }

    #[test]
    fn negation_and_not_fold() {
        assert_eq!(body_ops("int f(void) { return -5; }"), vec!["return -5"]);
        assert_eq!(body_ops("int f(void) { return !3; }"), vec!["return 0"]);
        assert_eq!(body_ops("int f(void) { return ~0; }"), vec!["return -1"]);
    }

    #[test]
    fn shifts_lower_to_ir() {
        let ops = body_ops("int f(int x) { return x << 3; }");
        assert!(ops[0].contains("x << 3"), "{:?}", ops);
        assert_eq!(body_ops("int f(void) { return 1 << 4; }"), vec!["return 16"]);
    }

    #[test]
    fn comparison_chain() {
        // a < b swaps into b > a
        let ops = body_ops("int f(int a, int b) { return a < b; }");
        assert!(ops[0].contains("b > a"), "{:?}", ops);
        // a != b is (0 == (a == b))
        let ops = body_ops("int f(int a, int b) { return a != b; }");
        assert!(ops[0].contains("a == b"), "{:?}", ops);
        assert!(ops[1].contains("0 =="), "{:?}", ops);
    }

    #[test]
    fn sizeof_folds_to_a_constant() {
        assert_eq!(
            body_ops("int f(void) { return sizeof(char); }"),
            vec!["return 1"]
        );
        assert_eq!(
            body_ops("int f(void) { return sizeof(int[4]); }"),
            vec!["return 16"]
        );
        assert_eq!(
            body_ops("int f(void) { int x; return sizeof x; }"),
            vec!["return 4"]
        );
        // the operand of sizeof is not evaluated
        assert_eq!(
            body_ops("int f(int x) { return sizeof(x++); }"),
            vec!["return 4"]
        );
    }

    #[test]
    fn sizeof_function_is_fatal() {
        assert_eq!(
            parse_all("int g(void); int f(void) { return sizeof g; }"),
            Err(SemanticError::SizeofFunction.into())
        );
    }

    #[test]
    fn sizeof_incomplete_is_fatal() {
        assert!(matches!(
            parse_all("struct s; int f(void) { return sizeof(struct s); }"),
            Err(Error::Semantic(SemanticError::SizeofIncomplete(_)))
        ));
    }

    #[test]
    fn prefix_and_postfix_increment_differ() {
        // prefix: add, then assign; the value is the stored sum
        let prefix = body_ops("int f(int x) { return ++x; }");
        assert!(matches!(prefix[0].as_str(), s if s.contains("x + 1")));
        // postfix: copy out the old value first
        let postfix = body_ops("int f(int x) { return x++; }");
        assert!(postfix[0].contains("= x"), "{:?}", postfix);
        assert!(postfix.last().unwrap().contains("return .t"), "{:?}", postfix);
    }

    #[test]
    fn cast_expression_vs_parenthesized() {
        // (long) x is a cast; (x) is not
        let cast = body_ops("int f(int x) { return (long) x; }");
        assert!(cast[0].contains("(long)"), "{:?}", cast);
        assert_eq!(
            body_ops("int f(int x) { return (x); }"),
            vec!["return x"]
        );
        // casting with a typedef name needs the symbol table
        let cast = body_ops("typedef long big; int f(int x) { return (big) x; }");
        assert!(cast[0].contains("(long)"), "{:?}", cast);
    }

    #[test]
    fn explicit_pointer_cast_is_allowed() {
        let ops = body_ops("int f(long n) { return *(int *) n; }");
        assert!(ops[0].contains("(int *)"), "{:?}", ops);
    }

    #[test]
    fn call_emits_params_then_call() {
        let ops = body_ops("int g(int, int); int f(void) { return g(1, 2); }");
        assert_eq!(ops[0], "param 1");
        assert_eq!(ops[1], "param 2");
        assert!(ops[2].contains("call g"), "{:?}", ops);
    }

    #[test]
    fn too_few_arguments_is_fatal() {
        assert!(matches!(
            parse_all("int g(int, int); int f(void) { return g(1); }"),
            Err(Error::Semantic(SemanticError::TooFewArguments(_, 2)))
        ));
    }

    #[test]
    fn call_through_function_pointer() {
        let ops = body_ops(
            "int g(int); int f(int (*callback)(int)) { return (*callback)(5); }",
        );
        assert_eq!(ops[0], "param 5");
        assert!(ops[1].contains("call"), "{:?}", ops);
    }

    #[test]
    fn calling_non_function_is_fatal() {
        assert!(matches!(
            parse_all("int f(int x) { return x(); }"),
            Err(Error::Semantic(SemanticError::NotAFunction(_)))
        ));
    }

    #[test]
    fn member_access_uses_layout_offset() {
        let ops = body_ops(
            "struct s { char a; int b; };
             int f(struct s *p) { return p->b; }",
        );
        // b lives at offset 4 behind the pointer
        assert!(
            ops.iter().any(|op| op.contains("*(p+4)")),
            "{:?}",
            ops
        );
    }

    #[test]
    fn dot_access_takes_the_address() {
        let ops = body_ops(
            "struct s { int a; int b; };
             int f(void) { struct s x; return x.b; }",
        );
        assert!(ops[0].contains("&x"), "{:?}", ops);
        assert!(ops.iter().any(|op| op.contains("+4)")), "{:?}", ops);
    }

    #[test]
    fn missing_member_is_fatal() {
        assert!(matches!(
            parse_all("struct s { int a; }; int f(struct s *p) { return p->b; }"),
            Err(Error::Semantic(SemanticError::NoSuchMember(_, _)))
        ));
    }

    #[test]
    fn undefined_symbol_is_fatal() {
        assert_eq!(
            parse_all("int f(void) { return missing; }"),
            Err(SemanticError::UndefinedSymbol("missing".into()).into())
        );
    }

    #[test]
    fn enumerators_are_immediates() {
        assert_eq!(
            body_ops("enum e { A, B, C }; int f(void) { return C; }"),
            vec!["return 2"]
        );
    }

    #[test]
    fn short_circuit_and_builds_blocks() {
        let mut p = parser("int f(int x) { return x && x + 1; }");
        let fragment = p.parse_next().unwrap().unwrap();
        // entry assigns x into the temporary, then branches
        let body = fragment.block(fragment.body);
        assert!(
            matches!(&body.ops[..], [Op::Assign { src, .. }] if src.symbol().map(|s| s.name()) == Some("x".into())),
            "{}",
            fragment
        );
        let [on_false, on_true] = body.jump;
        let (merge, next) = (on_false.unwrap(), on_true.unwrap());
        // the true edge evaluates x + 1 and folds it into the temporary
        let next = fragment.block(next);
        assert!(
            next.ops
                .iter()
                .any(|op| matches!(op, Op::Binary { op: BinaryOp::Add, .. })),
            "{}",
            fragment
        );
        assert!(next
            .ops
            .iter()
            .any(|op| matches!(op, Op::Binary { op: BinaryOp::LogicalAnd, .. })));
        assert_eq!(next.jump[0], Some(merge));
        // the merge block returns the temporary
        assert!(
            matches!(&fragment.block(merge).ops[..], [Op::Return(Some(v))] if matches!(v.kind, VarKind::Direct { .. })),
            "{}",
            fragment
        );
        assert!(fragment.reachable().len() >= 3);
    }

    #[test]
    fn short_circuit_wrong_polarity_or() {
        let mut p = parser("int f(int x) { return x || 1; }");
        let fragment = p.parse_next().unwrap().unwrap();
        let body = fragment.block(fragment.body);
        let [on_false, on_true] = body.jump;
        // for ||, true short-circuits straight to the merge block
        let merge = on_true.unwrap();
        assert!(matches!(
            &fragment.block(merge).ops[..],
            [Op::Return(Some(_))]
        ));
        // the false edge keeps evaluating
        assert_ne!(on_false.unwrap(), merge);
    }

    #[test]
    fn ternary_lowers_to_branches() {
        let mut p = parser("int f(int x) { return x ? 1 : 2; }");
        let fragment = p.parse_next().unwrap().unwrap();
        let body = fragment.block(fragment.body);
        let [on_false, on_true] = body.jump;
        let (else_block, then_block) = (on_false.unwrap(), on_true.unwrap());
        let assigned = |id| match &fragment.block(id).ops[..] {
            [Op::Assign { src, .. }] => src.value().cloned(),
            other => panic!("expected one assignment, got {:?}", other),
        };
        assert_eq!(assigned(then_block), Some(Value::Int(1)));
        assert_eq!(assigned(else_block), Some(Value::Int(2)));
        // both arms rejoin and the merge returns the temporary
        assert_eq!(
            fragment.block(then_block).jump[0],
            fragment.block(else_block).jump[0]
        );
    }

    #[test]
    fn assignment_to_rvalue_is_fatal() {
        assert_eq!(
            parse_all("int f(int x) { 3 = x; return 0; }"),
            Err(SemanticError::NotAssignable.into())
        );
        assert_eq!(
            parse_all("int f(int x) { +x = 1; return 0; }"),
            Err(SemanticError::NotAssignable.into())
        );
    }

    #[test]
    fn assignment_returns_its_value() {
        let ops = body_ops("int f(int x, int y) { return x = y = 1; }");
        assert!(ops.iter().any(|op| op.contains("y = 1")), "{:?}", ops);
        assert!(ops.iter().any(|op| op.contains("x = y")), "{:?}", ops);
    }

    #[test]
    fn string_literals_decay_in_calls() {
        let ops = body_ops(
            "int puts(char *s); int f(void) { return puts(\"hi\"); }",
        );
        assert_eq!(ops[0], "param \"hi\"");
    }

    #[test]
    fn comma_evaluates_left_to_right() {
        let ops = body_ops("int f(int x) { return x = 1, x + 1; }");
        assert!(ops[0].contains("x = 1"), "{:?}", ops);
    }
}
