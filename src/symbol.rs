//! Symbols and scoped namespaces.
//!
//! C resolves names in three independent namespaces: ordinary identifiers,
//! labels, and struct/union/enum tags. Each is a [`Namespace`]: an ordered
//! list of every symbol ever introduced plus a stack of name → symbol maps,
//! one per open scope. Popping a scope drops its bindings but not the
//! symbols themselves: the end-of-input pass over tentative definitions
//! walks symbols long after inner scopes have closed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Formatter};

use crate::data::error::{CompileResult, SemanticError};
use crate::data::types::{print_type, Qualifiers, Type};
use crate::intern::InternedStr;

thread_local!(
    /// The global storage for all symbols.
    ///
    /// `SymbolId`s index into this store, so a `Var` or an IR operation can
    /// name its symbol without holding a reference into any namespace. The
    /// store is append-only except for the sanctioned in-place updates:
    /// promoting a tentative definition, completing an unbounded array type
    /// from its initializer, and marking an enum tag's body as seen.
    static SYMBOLS: RefCell<Vec<Symbol>> = Default::default()
);

/// An identifier used to look up a [`Symbol`] in the global store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

impl SymbolId {
    /// A copy of the symbol. Guaranteed not to panic, a `SymbolId` is always
    /// valid.
    pub fn get(self) -> Symbol {
        self.map(Symbol::clone)
    }
    pub(crate) fn map<R>(self, f: impl FnOnce(&Symbol) -> R) -> R {
        SYMBOLS.with(|store| f(&store.borrow()[self.0]))
    }
    pub(crate) fn update<R>(self, f: impl FnOnce(&mut Symbol) -> R) -> R {
        SYMBOLS.with(|store| f(&mut store.borrow_mut()[self.0]))
    }
    pub fn name(self) -> InternedStr {
        self.map(|sym| sym.name)
    }
    pub fn ctype(self) -> Type {
        self.map(|sym| sym.ctype.clone())
    }
}

impl Symbol {
    pub(crate) fn insert(self) -> SymbolId {
        SYMBOLS.with(|store| {
            let mut store = store.borrow_mut();
            let id = store.len();
            store.push(self);
            SymbolId(id)
        })
    }
}

/// How far along a declaration is. The states are ordered: a later,
/// more-defined declaration of the same file-scope name wins a merge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// `typedef int T;`: a name for a type, not an object.
    Typedef,
    /// A file-scope object declared without an initializer; becomes a
    /// zero-initialized definition if nothing more definite shows up.
    Tentative,
    /// `extern int x;`: declared here, defined elsewhere.
    Declaration,
    Definition,
    /// An enumerator constant.
    Enum,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: InternedStr,
    pub ctype: Type,
    pub kind: SymbolKind,
    pub linkage: Linkage,
    pub qualifiers: Qualifiers,
    /// Scope nesting depth at introduction; 0 is file scope.
    pub depth: usize,
    /// The value of an enumerator constant.
    pub enum_value: i64,
    /// For enum tags: whether the `{ ... }` body has been seen.
    pub enum_defined: bool,
}

impl Symbol {
    pub(crate) fn new(name: InternedStr, ctype: Type, kind: SymbolKind, linkage: Linkage) -> Symbol {
        Symbol {
            name,
            ctype,
            kind,
            linkage,
            qualifiers: Qualifiers::NONE,
            depth: 0,
            enum_value: 0,
            enum_defined: false,
        }
    }
}

impl SymbolKind {
    /// Merge precedence at file scope; `None` means the kind never merges.
    fn rank(self) -> Option<u8> {
        match self {
            SymbolKind::Declaration => Some(0),
            SymbolKind::Tentative => Some(1),
            SymbolKind::Definition => Some(2),
            SymbolKind::Typedef | SymbolKind::Enum => None,
        }
    }
}

/// A scoped symbol table.
#[derive(Debug)]
pub struct Namespace {
    /// For diagnostics and logging only.
    name: &'static str,
    /// Every symbol introduced in this namespace, in program order.
    all: Vec<SymbolId>,
    /// Innermost scope last; a name resolves to its innermost binding.
    scopes: Vec<HashMap<InternedStr, SymbolId>>,
    /// Counter for compiler-generated temporaries.
    temps: usize,
}

impl Namespace {
    pub fn new(name: &'static str) -> Namespace {
        Namespace {
            name,
            all: Vec::new(),
            scopes: vec![HashMap::new()],
            temps: 0,
        }
    }

    /// 0 is file scope.
    pub fn current_depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        log::trace!("{}: push to depth {}", self.name, self.current_depth());
    }

    pub fn pop_scope(&mut self) {
        log::trace!("{}: pop from depth {}", self.name, self.current_depth());
        self.scopes.pop();
        assert!(!self.scopes.is_empty(), "popped the file scope");
    }

    /// The innermost binding for `name`, if any.
    pub fn lookup(&self, name: InternedStr) -> Option<SymbolId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }

    /// Introduce a symbol at the current depth and return its id.
    ///
    /// At file scope a compatible redeclaration merges with the existing
    /// symbol (the more-defined kind wins); a second definition of the same
    /// name is an error. At block scope any redeclaration at the same depth
    /// is an error.
    pub fn add(&mut self, mut proto: Symbol) -> CompileResult<SymbolId> {
        proto.depth = self.current_depth();
        let existing = self
            .scopes
            .last()
            .and_then(|scope| scope.get(&proto.name).copied());
        let existing = match existing {
            None => {
                let id = proto.insert();
                self.all.push(id);
                self.scopes
                    .last_mut()
                    .expect("namespace always has a file scope")
                    .insert(id.name(), id);
                return Ok(id);
            }
            Some(id) => id,
        };

        if proto.depth != 0 {
            return Err(SemanticError::BlockRedeclaration(proto.name).into());
        }
        let (old_kind, old_type) = existing.map(|sym| (sym.kind, sym.ctype.clone()));
        let (old_rank, new_rank) = match (old_kind.rank(), proto.kind.rank()) {
            (Some(o), Some(n)) => (o, n),
            // typedefs may be identically redeclared; anything else is a
            // redefinition
            _ if old_kind == proto.kind
                && proto.kind == SymbolKind::Typedef
                && old_type == proto.ctype =>
            {
                return Ok(existing);
            }
            _ => return Err(SemanticError::Redefinition(proto.name).into()),
        };
        if old_type != proto.ctype {
            return Err(SemanticError::IncompatibleRedeclaration(proto.name).into());
        }
        if old_kind == SymbolKind::Definition && proto.kind == SymbolKind::Definition {
            return Err(SemanticError::Redefinition(proto.name).into());
        }
        if new_rank > old_rank {
            existing.update(|sym| sym.kind = proto.kind);
        }
        Ok(existing)
    }

    /// A fresh, uniquely-named symbol for a compiler-generated temporary.
    pub fn temp(&mut self, ctype: Type) -> SymbolId {
        let name = InternedStr::get_or_intern(format!(".t{}", self.temps));
        self.temps += 1;
        self.add(Symbol::new(name, ctype, SymbolKind::Definition, Linkage::None))
            .expect("temporary names are unique")
    }

    /// Every symbol ever introduced in this namespace, in program order,
    /// including ones whose scope has since been popped. The end-of-input
    /// pass needs those: a block-scope `static` is still a tentative
    /// definition of the translation unit.
    pub(crate) fn all_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.all.iter().copied()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        print_type(&self.ctype, Some(self.name), f)
    }
}
