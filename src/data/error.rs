use std::collections::VecDeque;

use thiserror::Error;

use super::lex::Token;
use super::types::Type;
use crate::intern::InternedStr;

/// Any error the front end can report.
///
/// Errors are fatal: the parser gives up on the translation unit and the
/// iterator yields nothing further. Recoverable diagnostics are [`Warning`]s
/// and go through the [`ErrorHandler`] instead.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid syntax: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("invalid program: {0}")]
    Semantic(#[from] SemanticError),
}

pub type CompileError = Error;
pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SyntaxError {
    #[error("expected {0}, got <end-of-input>")]
    EndOfInput(&'static str),

    #[error("expected '{expected}', got '{got}'")]
    ExpectedToken { expected: Token, got: Token },

    #[error("expected identifier, got '{0}'")]
    ExpectedId(Token),

    #[error("expected type name, got '{0}'")]
    ExpectedType(Token),

    #[error("unexpected token '{0}', not a valid primary expression")]
    NotAPrimary(Token),

    #[error("unexpected identifier in abstract declarator")]
    IdInAbstractDeclarator,

    #[error("unexpected trailing comma in parameter list")]
    TrailingComma,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SemanticError {
    // declarations
    #[error("only one storage class specifier allowed")]
    ConflictingStorageClass,

    #[error("storage class specifier not allowed here")]
    StorageClassNotAllowed,

    #[error("symbol '{0}' was already defined")]
    Redefinition(InternedStr),

    #[error("redeclaration of '{0}'")]
    BlockRedeclaration(InternedStr),

    #[error("conflicting types for '{0}'")]
    IncompatibleRedeclaration(InternedStr),

    #[error("extern symbol '{0}' cannot be initialized")]
    ExternInitializer(InternedStr),

    #[error("tag '{0}' was previously declared as a different kind of type")]
    TagMismatch(InternedStr),

    #[error("redefinition of tag '{0}'")]
    TagRedefinition(InternedStr),

    #[error("missing type specifier in member declaration")]
    MissingMemberType,

    #[error("invalid member declarator")]
    InvalidMemberDeclarator,

    #[error("invalid function definition")]
    InvalidFunctionDefinition,

    #[error("missing parameter name at position {0}")]
    MissingParamName(usize),

    // types
    #[error("array has incomplete element type")]
    IncompleteElementType,

    #[error("array dimension must be a natural number, got {0}")]
    ArrayDimension(i64),

    #[error("cannot apply 'sizeof' to a function")]
    SizeofFunction,

    #[error("cannot apply 'sizeof' to incomplete type '{0}'")]
    SizeofIncomplete(Type),

    // initializers
    #[error("initializer for '{0}' must be computable at load time")]
    NonConstantInit(InternedStr),

    #[error("aggregate initializer applied to non-aggregate type '{0}'")]
    NotAnAggregate(Type),

    // expressions
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(InternedStr),

    #[error("called object of type '{0}' is not a function")]
    NotAFunction(Type),

    #[error("too few arguments to '{0}', expected {1}")]
    TooFewArguments(InternedStr, usize),

    #[error("member access on non-object type '{0}'")]
    NotAnObject(Type),

    #[error("no member named '{0}' in '{1}'")]
    NoSuchMember(InternedStr, Type),

    #[error("cannot dereference expression of type '{0}'")]
    NotAPointer(Type),

    #[error("cannot cast to '{0}'")]
    BadCast(Type),

    #[error("expression is not assignable")]
    NotAssignable,

    #[error("expression is not an address")]
    NotAddressable,

    #[error("invalid operands to binary expression ('{0}' and '{1}')")]
    InvalidOperands(Type, Type),

    #[error("expression must be computable at compile time")]
    NotConstant,

    #[error("'{0}' statement not in loop")]
    NotInLoop(&'static str),
}

/// A non-fatal diagnostic. These never stop the parse.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Warning {
    #[error("implicit conversion from non-integer type in enum initializer")]
    NonIntegerEnum,

    #[error("incomplete initializer for fixed-size array is not yet supported")]
    IncompleteArrayInit,

    #[error("'{0}' is parsed but not lowered")]
    Unimplemented(&'static str),
}

/// Collects warnings while the parser runs; fatal errors are returned
/// directly instead. Callers drain the queue with `Parser::warnings`.
#[derive(Debug, Default)]
pub(crate) struct ErrorHandler {
    pub(crate) warnings: VecDeque<Warning>,
}

impl ErrorHandler {
    pub(crate) fn warn(&mut self, warning: Warning) {
        log::debug!("warning: {}", warning);
        self.warnings.push_back(warning);
    }
}

impl Error {
    pub fn is_syntax_err(&self) -> bool {
        matches!(self, Error::Syntax(_))
    }
    pub fn is_semantic_err(&self) -> bool {
        matches!(self, Error::Semantic(_))
    }
}
