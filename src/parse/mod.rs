pub(crate) mod decl;
mod expr;
mod stmt;

use std::collections::VecDeque;
use std::mem;

use crate::data::{
    ir::{BlockId, Decl, Var},
    types::{ArrayLength, Type},
    CompileResult, ErrorHandler, SemanticError, SyntaxError, Token, Warning,
};
use crate::eval::Evaluator;
use crate::intern::InternedStr;
use crate::symbol::{Namespace, SymbolId, SymbolKind};
use crate::RecursionGuard;

/// An iterator over [`Token`], but with a little more flexibility.
///
/// The preprocessor is outside this crate; anything that yields tokens can
/// drive the parser.
pub trait Lexer {
    fn next(&mut self) -> Option<Token>;
}

impl<I: Iterator<Item = Token>> Lexer for I {
    fn next(&mut self) -> Option<Token> {
        Iterator::next(self)
    }
}

/// A recursive-descent parser over a token stream.
///
/// Each call to [`Parser::parse_next`] (or each iterator step) yields the
/// next translation-unit fragment: a defined function with its control-flow
/// graph, or a batch of global initializer code. After the tokens run out,
/// one final fragment zero-initializes every file-scope object that stayed
/// tentative, and then the iterator is done.
#[derive(Debug)]
pub struct Parser<I: Lexer> {
    tokens: I,
    /// the last token we took from the lexer. `None` if we haven't looked
    /// ahead yet.
    current: Option<Token>,
    /// one more token of lookahead, for telling `(T) x` from `(x)`.
    next: Option<Token>,
    /// ordinary identifiers: objects, functions, typedefs, enumerators
    pub(crate) identifiers: Namespace,
    /// struct/union/enum tags
    pub(crate) tags: Namespace,
    /// statement labels; one scope per function definition
    pub(crate) labels: Namespace,
    /// the fragment under construction
    pub(crate) decl: Decl,
    /// innermost loop last; where `break` and `continue` go
    pub(crate) loops: Vec<LoopTargets>,
    /// whether the end-of-input pass over tentative definitions has run
    finalized: bool,
    /// a fatal error ends the translation unit; nothing more is yielded
    poisoned: bool,
    pub(crate) error_handler: ErrorHandler,
    recursion_guard: RecursionGuard,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct LoopTargets {
    pub(crate) break_target: BlockId,
    pub(crate) continue_target: BlockId,
}

impl<I: Lexer> Parser<I> {
    pub fn new(tokens: I) -> Self {
        Parser {
            tokens,
            current: None,
            next: None,
            identifiers: Namespace::new("identifiers"),
            tags: Namespace::new("tags"),
            labels: Namespace::new("labels"),
            decl: Decl::default(),
            loops: Vec::new(),
            finalized: false,
            poisoned: false,
            error_handler: ErrorHandler::default(),
            recursion_guard: RecursionGuard::default(),
        }
    }

    /// Parse the next external declaration.
    ///
    /// Returns `Ok(None)` once the translation unit is exhausted and the
    /// tentative-definition fragment (if any) has been yielded.
    pub fn parse_next(&mut self) -> CompileResult<Option<Decl>> {
        self.decl = Decl::new();
        while self.peek_token().is_some() {
            self.decl.fun = None;
            let mut cursor = self.decl.body;
            self.declaration(&mut cursor)?;

            if self.decl.fun.is_some() || !self.decl.block(self.decl.head).ops.is_empty() {
                return Ok(Some(self.take_fragment()));
            }
        }

        if !self.finalized {
            self.finalized = true;
            let tentative: Vec<SymbolId> = self
                .identifiers
                .all_symbols()
                .filter(|id| {
                    id.map(|sym| {
                        sym.kind == SymbolKind::Tentative
                            && !sym.ctype.is_function()
                            && (sym.depth == 0 || sym.linkage == crate::symbol::Linkage::Internal)
                    })
                })
                .collect();
            for id in &tentative {
                id.update(|sym| {
                    sym.kind = SymbolKind::Definition;
                    // an array that stayed unbounded completes to one element
                    if let Type::Array(_, length @ ArrayLength::Incomplete) = &mut sym.ctype {
                        *length = ArrayLength::Fixed(1);
                    }
                });
                let head = self.decl.head;
                self.eval().assign(head, Var::direct(*id), Var::int(0))?;
            }
            if !tentative.is_empty() {
                return Ok(Some(self.take_fragment()));
            }
        }
        Ok(None)
    }

    fn take_fragment(&mut self) -> Decl {
        let mut done = mem::take(&mut self.decl);
        done.finalize();
        log::debug!(
            "fragment complete: fun={:?}, {} locals",
            done.fun.map(SymbolId::name),
            done.locals.len()
        );
        done
    }

    /// Return all warnings seen so far.
    ///
    /// These warnings are consumed and will not be returned if you call
    /// `warnings()` again.
    pub fn warnings(&mut self) -> VecDeque<Warning> {
        mem::take(&mut self.error_handler.warnings)
    }

    pub(crate) fn eval(&mut self) -> Evaluator {
        Evaluator {
            decl: &mut self.decl,
            idents: &mut self.identifiers,
        }
    }

    pub(crate) fn recursion_check(&mut self) -> RecursionGuard {
        self.recursion_guard.recursion_check()
    }

    /// A constant expression: evaluated into a scratch block, which must end
    /// up untouched with an immediate result.
    pub(crate) fn constant_expression(&mut self) -> CompileResult<Var> {
        let scratch = self.decl.new_block();
        let mut cursor = scratch;
        let value = self.conditional_expression(&mut cursor)?;
        if cursor != scratch || !self.decl.block(scratch).ops.is_empty() || !value.is_immediate() {
            return Err(SemanticError::NotConstant.into());
        }
        Ok(value)
    }

    /* token plumbing */

    fn __impl_next_token(&mut self) -> Option<Token> {
        self.tokens.next()
    }
    pub(crate) fn next_token(&mut self) -> Option<Token> {
        if self.current.is_some() {
            let tmp = mem::take(&mut self.next);
            mem::replace(&mut self.current, tmp)
        } else {
            self.__impl_next_token()
        }
    }
    pub(crate) fn peek_token(&mut self) -> Option<&Token> {
        if self.current.is_none() {
            self.current = self.next.take().or_else(|| self.__impl_next_token());
        }
        self.current.as_ref()
    }
    pub(crate) fn peek_next_token(&mut self) -> Option<&Token> {
        if self.next.is_none() {
            if self.current.is_none() {
                self.current = self.__impl_next_token();
            }
            self.next = self.__impl_next_token();
        }
        self.next.as_ref()
    }
    pub(crate) fn match_next(&mut self, token: &Token) -> Option<Token> {
        if self.peek_token().map_or(false, |t| t.same_kind(token)) {
            self.next_token()
        } else {
            None
        }
    }
    pub(crate) fn match_id(&mut self) -> Option<InternedStr> {
        match self.peek_token() {
            Some(&Token::Id(name)) => {
                self.next_token();
                Some(name)
            }
            _ => None,
        }
    }
    pub(crate) fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        match self.peek_token() {
            Some(got) if got.same_kind(&expected) => Ok(self.next_token().unwrap()),
            Some(got) => Err(SyntaxError::ExpectedToken {
                expected,
                got: got.clone(),
            }
            .into()),
            None => Err(SyntaxError::EndOfInput("a token").into()),
        }
    }
    pub(crate) fn expect_id(&mut self) -> CompileResult<InternedStr> {
        match self.match_id() {
            Some(id) => Ok(id),
            None => match self.peek_token() {
                Some(got) => Err(SyntaxError::ExpectedId(got.clone()).into()),
                None => Err(SyntaxError::EndOfInput("an identifier").into()),
            },
        }
    }
}

impl<I: Lexer> Iterator for Parser<I> {
    type Item = CompileResult<Decl>;
    /// ```yacc
    /// translation_unit
    /// : external_declaration
    /// | translation_unit external_declaration
    /// ;
    /// ```
    /// <http://www.quut.com/c/ANSI-C-grammar-y.html#translation_unit>
    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            return None;
        }
        match self.parse_next() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => None,
            Err(err) => {
                self.poisoned = true;
                Some(Err(err))
            }
        }
    }
}
