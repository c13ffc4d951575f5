//! The emitted intermediate representation.
//!
//! Each external declaration lowers to a [`Decl`] fragment: an arena of
//! basic [`Block`]s threaded by `jump` edges, holding three-address [`Op`]s
//! over [`Var`] operands. The back end consumes fragments one at a time and
//! owns nothing across them.

use std::fmt::{self, Formatter};

use derive_more::Display;

use super::types::{ArrayLength, Type};
use crate::intern::InternedStr;
use crate::symbol::{SymbolId, SymbolKind};

/// A compile-time value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    /// The label of an interned string literal.
    Str(InternedStr),
}

/// A value handle: every IR operand is one of these.
#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    pub kind: VarKind,
    pub ctype: Type,
    /// Whether this designates a storage location that may be assigned to.
    pub lvalue: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VarKind {
    /// The storage of `symbol`, starting `offset` bytes in.
    Direct { symbol: SymbolId, offset: u64 },
    /// The memory `symbol` points to, `offset` bytes past the pointer.
    Deref { symbol: SymbolId, offset: u64 },
    /// A constant.
    Immediate(Value),
}

impl Var {
    /// The storage of a named symbol. Enumerator constants fold to an
    /// immediate here; everything else designates its storage location and
    /// is assignable unless it is a function.
    pub fn direct(symbol: SymbolId) -> Var {
        symbol.map(|sym| {
            if sym.kind == SymbolKind::Enum {
                Var::int(sym.enum_value)
            } else {
                Var {
                    kind: VarKind::Direct { symbol, offset: 0 },
                    lvalue: !sym.ctype.is_function(),
                    ctype: sym.ctype.clone(),
                }
            }
        })
    }

    /// An integer constant of type `int`.
    pub fn int(value: i64) -> Var {
        Var {
            kind: VarKind::Immediate(Value::Int(value)),
            ctype: Type::int(),
            lvalue: false,
        }
    }

    /// A string literal: an interned label with array-of-char type covering
    /// the bytes plus the terminating NUL.
    pub fn string(label: InternedStr, len: u64) -> Var {
        Var {
            kind: VarKind::Immediate(Value::Str(label)),
            ctype: Type::array(Type::char(), ArrayLength::Fixed(len)),
            lvalue: false,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, VarKind::Immediate(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            VarKind::Immediate(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn symbol(&self) -> Option<SymbolId> {
        match self.kind {
            VarKind::Direct { symbol, .. } | VarKind::Deref { symbol, .. } => Some(symbol),
            VarKind::Immediate(_) => None,
        }
    }

    /// Strip assignability, keeping everything else.
    pub(crate) fn rvalue(mut self) -> Var {
        self.lvalue = false;
        self
    }

    /// Reinterpret this value with another type. Only meaningful for
    /// immediates and freshly-created handles.
    pub(crate) fn with_type(mut self, ctype: Type) -> Var {
        self.ctype = ctype;
        self
    }
}

/// A binary operation in the IR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[display(fmt = "+")]
    Add,
    #[display(fmt = "-")]
    Sub,
    #[display(fmt = "*")]
    Mul,
    #[display(fmt = "/")]
    Div,
    #[display(fmt = "%")]
    Mod,
    #[display(fmt = "==")]
    Eq,
    #[display(fmt = ">=")]
    Ge,
    #[display(fmt = ">")]
    Gt,
    #[display(fmt = "&&")]
    LogicalAnd,
    #[display(fmt = "||")]
    LogicalOr,
    #[display(fmt = "&")]
    BitAnd,
    #[display(fmt = "|")]
    BitOr,
    #[display(fmt = "^")]
    Xor,
    #[display(fmt = "<<")]
    Shl,
    #[display(fmt = ">>")]
    Shr,
}

/// A three-address operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Assign {
        dst: Var,
        src: Var,
    },
    Binary {
        op: BinaryOp,
        dst: Var,
        left: Var,
        right: Var,
    },
    /// `dst = &src`
    Addr {
        dst: Var,
        src: Var,
    },
    /// `dst = *src`
    Deref {
        dst: Var,
        src: Var,
    },
    /// `dst = (T) src`, where `T` is `dst`'s type.
    Cast {
        dst: Var,
        src: Var,
    },
    /// Push an argument for the next `Call`.
    Param {
        src: Var,
    },
    Call {
        dst: Var,
        func: Var,
    },
    Return(Option<Var>),
}

/// Index of a block in its owning [`Decl`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// A basic block: straight-line operations plus up to two successor edges.
///
/// With only `jump[0]` set the block ends in an unconditional branch. With
/// both set it ends in a conditional branch on `expr`: true goes to
/// `jump[1]`, false to `jump[0]`. With neither set the block is terminal,
/// either because it returned or because it is an orphan.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub label: InternedStr,
    pub ops: Vec<Op>,
    /// The value of the most recent expression lowered into this block;
    /// the condition operand when the block ends in a conditional branch.
    pub expr: Option<Var>,
    pub jump: [Option<BlockId>; 2],
}

/// One translation-unit fragment: a defined function, or a batch of global
/// initializers. Owns every block allocated while parsing it.
#[derive(Debug, Default, PartialEq)]
pub struct Decl {
    blocks: Vec<Block>,
    /// Initialization code that runs before `main`: static initializers and
    /// the `__func__` prologue.
    pub head: BlockId,
    /// The entry block of a function body.
    pub body: BlockId,
    pub locals: Vec<SymbolId>,
    pub params: Vec<SymbolId>,
    /// The defined function's symbol, if this fragment is a definition.
    pub fun: Option<SymbolId>,
}

impl Default for BlockId {
    fn default() -> Self {
        BlockId(0)
    }
}

impl Decl {
    pub fn new() -> Decl {
        let mut decl = Decl {
            blocks: Vec::new(),
            head: BlockId(0),
            body: BlockId(0),
            locals: Vec::new(),
            params: Vec::new(),
            fun: None,
        };
        decl.head = decl.new_block();
        decl.body = decl.new_block();
        decl
    }

    /// Allocate a fresh, empty block owned by this fragment.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            label: InternedStr::get_or_intern(format!(".L{}", id.0)),
            ops: Vec::new(),
            expr: None,
            jump: [None, None],
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub(crate) fn push_op(&mut self, block: BlockId, op: Op) {
        self.blocks[block.0].ops.push(op);
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i), b))
    }

    /// Every block reachable from `head` or `body`, in discovery order.
    /// Orphan blocks parsed after a `return` or `break` are excluded.
    pub fn reachable(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut work = vec![self.body, self.head];
        while let Some(id) = work.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            order.push(id);
            for succ in self.block(id).jump.iter().flatten() {
                work.push(*succ);
            }
        }
        order
    }

    /// Mark the fragment ready for the back end.
    pub(crate) fn finalize(&mut self) {
        log::debug!("finalized fragment:\n{}", self);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{:?}", s.resolve_and_clone()),
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.kind {
            VarKind::Direct { symbol, offset: 0 } => write!(f, "{}", symbol.name()),
            VarKind::Direct { symbol, offset } => write!(f, "{}+{}", symbol.name(), offset),
            VarKind::Deref { symbol, offset: 0 } => write!(f, "*{}", symbol.name()),
            VarKind::Deref { symbol, offset } => write!(f, "*({}+{})", symbol.name(), offset),
            VarKind::Immediate(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Op::Assign { dst, src } => write!(f, "{} = {}", dst, src),
            Op::Binary {
                op,
                dst,
                left,
                right,
            } => write!(f, "{} = {} {} {}", dst, left, op, right),
            Op::Addr { dst, src } => write!(f, "{} = &{}", dst, src),
            Op::Deref { dst, src } => write!(f, "{} = *{}", dst, src),
            Op::Cast { dst, src } => write!(f, "{} = ({}) {}", dst, dst.ctype, src),
            Op::Param { src } => write!(f, "param {}", src),
            Op::Call { dst, func } => write!(f, "{} = call {}", dst, func),
            Op::Return(None) => write!(f, "return"),
            Op::Return(Some(value)) => write!(f, "return {}", value),
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (id, block) in self.blocks() {
            write!(f, "{}:", block.label)?;
            if id == self.head {
                write!(f, " ; head")?;
            } else if id == self.body {
                write!(f, " ; body")?;
            }
            writeln!(f)?;
            for op in &block.ops {
                writeln!(f, "\t{}", op)?;
            }
            match block.jump {
                [Some(next), None] => writeln!(f, "\tjmp {}", self.block(next).label)?,
                [Some(otherwise), Some(then)] => {
                    let cond = block.expr.as_ref().map(ToString::to_string);
                    writeln!(
                        f,
                        "\tbr {} ? {} : {}",
                        cond.as_deref().unwrap_or("<none>"),
                        self.block(then).label,
                        self.block(otherwise).label
                    )?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
