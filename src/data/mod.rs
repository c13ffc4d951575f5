pub mod error;
pub mod ir;
pub mod lex;
pub mod types;

pub use crate::intern::InternedStr;
pub(crate) use error::ErrorHandler;
pub use error::{CompileError, CompileResult, Error, SemanticError, SyntaxError, Warning};
pub use ir::{BinaryOp, Block, BlockId, Decl, Op, Value, Var, VarKind};
pub use lex::{ComparisonToken, Keyword, Token};
pub use types::{ArrayLength, FunctionType, Member, ObjectDef, ObjectType, Qualifiers, Type};

use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

/// A storage class specifier, at most one per declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Static,
    Extern,
    Auto,
    Register,
    Typedef,
}

impl TryFrom<Keyword> for StorageClass {
    type Error = Keyword;
    fn try_from(value: Keyword) -> Result<StorageClass, Keyword> {
        use StorageClass::*;
        match value {
            Keyword::Extern => Ok(Extern),
            Keyword::Static => Ok(Static),
            Keyword::Auto => Ok(Auto),
            Keyword::Register => Ok(Register),
            Keyword::Typedef => Ok(Typedef),
            _ => Err(value),
        }
    }
}

impl Display for StorageClass {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", &format!("{:?}", self).to_lowercase())
    }
}
