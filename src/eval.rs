//! The expression evaluator.
//!
//! Each operation applies the usual arithmetic conversions and the
//! array-to-pointer adjustment to its operands, emits the appropriate
//! three-address operation into the given block, and returns a [`Var`]
//! describing the result. Operands that are both compile-time constants
//! fold here instead of emitting anything, which is what lets file-scope
//! initializers demand an immediate.

use crate::arch;
use crate::data::{
    ir::{BinaryOp, BlockId, Decl, Op, Value, Var, VarKind},
    types::Type,
    CompileError, CompileResult, SemanticError,
};
use crate::symbol::{Namespace, SymbolId};

/// Borrows the fragment under construction and the identifier namespace
/// (for compiler temporaries) for the duration of one evaluation.
pub(crate) struct Evaluator<'a> {
    pub decl: &'a mut Decl,
    pub idents: &'a mut Namespace,
}

impl Evaluator<'_> {
    /// A fresh temporary, tracked as a local of the current fragment.
    pub(crate) fn temp(&mut self, ctype: Type) -> SymbolId {
        let id = self.idents.temp(ctype);
        self.decl.locals.push(id);
        id
    }

    fn temp_var(&mut self, ctype: Type) -> Var {
        let symbol = self.temp(ctype.clone());
        Var {
            kind: VarKind::Direct { symbol, offset: 0 },
            ctype,
            lvalue: false,
        }
    }

    /// Store `value` into `target`. The target must be an lvalue; the value
    /// is converted to the target's type. Returns the stored value as an
    /// rvalue.
    pub(crate) fn assign(&mut self, block: BlockId, target: Var, value: Var) -> CompileResult<Var> {
        if !target.lvalue {
            return Err(SemanticError::NotAssignable.into());
        }
        let value = self.convert(block, value, &target.ctype)?;
        self.decl.push_op(
            block,
            Op::Assign {
                dst: target.clone(),
                src: value,
            },
        );
        Ok(target.rvalue())
    }

    /// Apply a binary operator, performing the usual arithmetic conversions
    /// and scaling pointer arithmetic by the pointee size.
    pub(crate) fn expr(
        &mut self,
        block: BlockId,
        op: BinaryOp,
        left: Var,
        right: Var,
    ) -> CompileResult<Var> {
        use BinaryOp::*;
        let left = self.rvalue(block, left)?;
        let right = self.rvalue(block, right)?;

        // pointer arithmetic scales by the pointee size
        if op == Add && left.ctype.is_integer() && right.ctype.is_pointer() {
            return self.pointer_offset(block, op, right, left);
        }
        if (op == Add || op == Sub) && left.ctype.is_pointer() && right.ctype.is_integer() {
            return self.pointer_offset(block, op, left, right);
        }
        if op == Sub && left.ctype.is_pointer() && right.ctype.is_pointer() {
            return self.pointer_difference(block, left, right);
        }

        let ctype = self.result_type(op, &left, &right)?;
        let left = retype_immediate(left, &ctype, op);
        let right = retype_immediate(right, &ctype, op);
        if let (Some(&Value::Int(a)), Some(&Value::Int(b))) = (left.value(), right.value()) {
            if let Some(folded) = fold(op, a, b) {
                return Ok(Var::int(folded).with_type(ctype));
            }
        }

        let dst = self.temp_var(ctype);
        self.decl.push_op(
            block,
            Op::Binary {
                op,
                dst: dst.clone(),
                left,
                right,
            },
        );
        Ok(dst)
    }

    fn pointer_offset(
        &mut self,
        block: BlockId,
        op: BinaryOp,
        pointer: Var,
        index: Var,
    ) -> CompileResult<Var> {
        let pointee = pointer
            .ctype
            .referenced()
            .expect("pointer types always have a pointee")
            .clone();
        if !pointee.is_complete() {
            return Err(SemanticError::InvalidOperands(pointer.ctype, index.ctype).into());
        }
        let scaled = self.expr(block, BinaryOp::Mul, index, Var::int(pointee.size() as i64))?;
        let dst = self.temp_var(pointer.ctype.clone());
        self.decl.push_op(
            block,
            Op::Binary {
                op,
                dst: dst.clone(),
                left: pointer,
                right: scaled,
            },
        );
        Ok(dst)
    }

    fn pointer_difference(&mut self, block: BlockId, left: Var, right: Var) -> CompileResult<Var> {
        let pointee_size = left
            .ctype
            .referenced()
            .map(Type::size)
            .unwrap_or_default();
        if left.ctype != right.ctype || pointee_size == 0 {
            return Err(SemanticError::InvalidOperands(left.ctype, right.ctype).into());
        }
        let diff = self.temp_var(Type::integer(arch::LONG_SIZE));
        self.decl.push_op(
            block,
            Op::Binary {
                op: BinaryOp::Sub,
                dst: diff.clone(),
                left,
                right,
            },
        );
        self.expr(
            block,
            BinaryOp::Div,
            diff,
            Var::int(pointee_size as i64),
        )
    }

    fn result_type(&self, op: BinaryOp, left: &Var, right: &Var) -> CompileResult<Type> {
        use BinaryOp::*;
        let mismatch = || {
            CompileError::from(SemanticError::InvalidOperands(
                left.ctype.clone(),
                right.ctype.clone(),
            ))
        };
        match op {
            Eq | Ge | Gt => {
                // comparisons yield 0 or 1; pointers may be compared to each
                // other or to a constant
                let ok = (left.ctype.is_arithmetic() && right.ctype.is_arithmetic())
                    || (left.ctype.is_pointer()
                        && (right.ctype.is_pointer() || right.is_immediate()))
                    || (right.ctype.is_pointer() && left.is_immediate());
                if ok {
                    Ok(Type::int())
                } else {
                    Err(mismatch())
                }
            }
            LogicalAnd | LogicalOr => {
                if left.ctype.is_scalar() && right.ctype.is_scalar() {
                    Ok(Type::int())
                } else {
                    Err(mismatch())
                }
            }
            Shl | Shr => {
                if left.ctype.is_integer() && right.ctype.is_integer() {
                    Ok(integer_promote(&left.ctype))
                } else {
                    Err(mismatch())
                }
            }
            Mod | BitAnd | BitOr | Xor => {
                if left.ctype.is_integer() && right.ctype.is_integer() {
                    usual_arithmetic_conversions(&left.ctype, &right.ctype).ok_or_else(mismatch)
                } else {
                    Err(mismatch())
                }
            }
            Add | Sub | Mul | Div => {
                usual_arithmetic_conversions(&left.ctype, &right.ctype).ok_or_else(mismatch)
            }
        }
    }

    /// Take the address of an lvalue, yielding a pointer rvalue.
    pub(crate) fn addr(&mut self, block: BlockId, var: Var) -> CompileResult<Var> {
        if !var.lvalue {
            return Err(SemanticError::NotAddressable.into());
        }
        let ctype = Type::pointer(var.ctype.clone());
        // &*p is just p
        if let VarKind::Deref { symbol, offset: 0 } = var.kind {
            return Ok(Var {
                kind: VarKind::Direct { symbol, offset: 0 },
                ctype,
                lvalue: false,
            });
        }
        let dst = self.temp_var(ctype);
        self.decl.push_op(
            block,
            Op::Addr {
                dst: dst.clone(),
                src: var,
            },
        );
        Ok(dst)
    }

    /// Dereference a pointer, yielding an lvalue of the pointee type.
    /// Dereferencing a function pointer yields the function itself.
    pub(crate) fn deref(&mut self, block: BlockId, var: Var) -> CompileResult<Var> {
        let var = self.rvalue(block, var)?;
        let pointee = match &var.ctype {
            Type::Pointer(to, _) if to.is_complete() || to.is_function() => (**to).clone(),
            _ => return Err(SemanticError::NotAPointer(var.ctype).into()),
        };
        let symbol = match var.kind {
            VarKind::Direct { symbol, offset: 0 } => symbol,
            // computed pointers land in a temporary first
            _ => {
                let ptr = self.temp_var(var.ctype.clone());
                self.decl.push_op(
                    block,
                    Op::Assign {
                        dst: ptr.clone(),
                        src: var,
                    },
                );
                ptr.symbol().expect("temporaries are always direct")
            }
        };
        let lvalue = !pointee.is_function();
        Ok(Var {
            kind: VarKind::Deref { symbol, offset: 0 },
            ctype: pointee,
            lvalue,
        })
    }

    /// An explicit cast. Integer widening and narrowing follow C rules;
    /// integer↔pointer conversions are allowed here and only here. A cast
    /// to `void` discards the value and emits nothing.
    pub(crate) fn cast(&mut self, block: BlockId, var: Var, target: Type) -> CompileResult<Var> {
        if target == Type::Void {
            let var = self.rvalue(block, var)?;
            return Ok(var.with_type(Type::Void));
        }
        if !target.is_scalar() {
            return Err(SemanticError::BadCast(target).into());
        }
        let var = self.rvalue(block, var)?;
        if !var.ctype.is_scalar() {
            return Err(SemanticError::BadCast(var.ctype).into());
        }
        if var.ctype == target {
            return Ok(var);
        }
        if let Some(&Value::Int(value)) = var.value() {
            let value = match target {
                Type::Integer { size, signed } => truncate(value, size, signed),
                _ => value,
            };
            return Ok(Var::int(value).with_type(target));
        }
        let dst = self.temp_var(target);
        self.decl.push_op(
            block,
            Op::Cast {
                dst: dst.clone(),
                src: var,
            },
        );
        Ok(dst)
    }

    /// Materialize an rvalue snapshot of `var`, used by postfix `++`/`--`.
    pub(crate) fn copy(&mut self, block: BlockId, var: Var) -> CompileResult<Var> {
        let dst = self.temp_var(var.ctype.clone());
        self.decl.push_op(
            block,
            Op::Assign {
                dst: dst.clone(),
                src: var,
            },
        );
        Ok(dst)
    }

    /// Emit one argument for the next call.
    pub(crate) fn param(&mut self, block: BlockId, arg: Var) -> CompileResult<()> {
        let src = self.rvalue(block, arg)?;
        self.decl.push_op(block, Op::Param { src });
        Ok(())
    }

    /// Call a function value, consuming previously-emitted params. Returns a
    /// fresh temporary of the return type; for `void` functions the result
    /// must never be consumed.
    pub(crate) fn call(&mut self, block: BlockId, func: Var) -> CompileResult<Var> {
        let return_type = match &func.ctype {
            Type::Function(f) => (*f.return_type).clone(),
            _ => return Err(SemanticError::NotAFunction(func.ctype.clone()).into()),
        };
        let dst = self.temp_var(return_type);
        self.decl.push_op(
            block,
            Op::Call {
                dst: dst.clone(),
                func,
            },
        );
        Ok(dst)
    }

    /// Convert a value to the exact type of an assignment target.
    pub(crate) fn convert(
        &mut self,
        block: BlockId,
        value: Var,
        target: &Type,
    ) -> CompileResult<Var> {
        if value.ctype == *target {
            return Ok(value.rvalue());
        }
        let value = self.rvalue(block, value)?;
        if value.ctype == *target {
            return Ok(value);
        }
        if let Some(&Value::Int(int)) = value.value() {
            let int = match target {
                Type::Integer { size, signed } => truncate(int, *size, *signed),
                _ => int,
            };
            return Ok(Var::int(int).with_type(target.clone()));
        }
        if value.ctype.is_scalar() && target.is_scalar() {
            let dst = self.temp_var(target.clone());
            self.decl.push_op(
                block,
                Op::Cast {
                    dst: dst.clone(),
                    src: value,
                },
            );
            return Ok(dst);
        }
        Err(SemanticError::InvalidOperands(target.clone(), value.ctype).into())
    }

    /// Strip lvalue-ness and apply array-to-pointer decay.
    pub(crate) fn rvalue(&mut self, block: BlockId, var: Var) -> CompileResult<Var> {
        if let Type::Array(element, _) = &var.ctype {
            let decayed = Type::pointer((**element).clone());
            return Ok(match var.kind {
                // a string literal is already a label for its first byte
                VarKind::Immediate(_) => var.rvalue().with_type(decayed),
                _ => {
                    let dst = self.temp_var(decayed);
                    self.decl.push_op(
                        block,
                        Op::Addr {
                            dst: dst.clone(),
                            src: var,
                        },
                    );
                    dst
                }
            });
        }
        Ok(var.rvalue())
    }
}

/// Promote integer types below `int` up to `int`.
fn integer_promote(ctype: &Type) -> Type {
    match *ctype {
        Type::Integer { size, .. } if size < arch::INT_SIZE => Type::int(),
        _ => ctype.clone(),
    }
}

/// 6.3.1.8 Usual arithmetic conversions. `None` if either operand is not
/// arithmetic.
pub(crate) fn usual_arithmetic_conversions(left: &Type, right: &Type) -> Option<Type> {
    if !left.is_arithmetic() || !right.is_arithmetic() {
        return None;
    }
    match (left, right) {
        (Type::Real { size: a }, Type::Real { size: b }) => Some(Type::real(*a.max(b))),
        (real @ Type::Real { .. }, _) | (_, real @ Type::Real { .. }) => Some(real.clone()),
        _ => {
            let (left, right) = (integer_promote(left), integer_promote(right));
            match (left, right) {
                (
                    Type::Integer {
                        size: a,
                        signed: sa,
                    },
                    Type::Integer {
                        size: b,
                        signed: sb,
                    },
                ) => {
                    let size = a.max(b);
                    // on equal rank, unsigned wins; a strictly larger signed
                    // type can represent the smaller unsigned one
                    let signed = if a == b { sa && sb } else if a > b { sa } else { sb };
                    Some(Type::Integer { size, signed })
                }
                _ => unreachable!("integer promotion yields integers"),
            }
        }
    }
}

/// Wrap a constant to the given integer width.
fn truncate(value: i64, size: u64, signed: bool) -> i64 {
    if size >= 8 {
        return value;
    }
    let bits = size * 8;
    let mask = (1u64 << bits) - 1;
    let wrapped = (value as u64) & mask;
    if signed && wrapped >> (bits - 1) != 0 {
        (wrapped | !mask) as i64
    } else {
        wrapped as i64
    }
}

fn retype_immediate(var: Var, ctype: &Type, op: BinaryOp) -> Var {
    use BinaryOp::*;
    // comparison operands keep their own type; only the result is `int`
    if matches!(op, Eq | Ge | Gt | LogicalAnd | LogicalOr) {
        return var;
    }
    match var.kind {
        VarKind::Immediate(Value::Int(_)) if ctype.is_integer() => var.with_type(ctype.clone()),
        _ => var,
    }
}

fn fold(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    use BinaryOp::*;
    Some(match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        Eq => (a == b) as i64,
        Ge => (a >= b) as i64,
        Gt => (a > b) as i64,
        LogicalAnd => (a != 0 && b != 0) as i64,
        LogicalOr => (a != 0 || b != 0) as i64,
        BitAnd => a & b,
        BitOr => a | b,
        Xor => a ^ b,
        Shl => a.wrapping_shl(b as u32 & 63),
        Shr => a.wrapping_shr(b as u32 & 63),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::ArrayLength;
    use crate::symbol::{Linkage, Symbol, SymbolKind};

    fn with_eval<R>(f: impl FnOnce(&mut Evaluator, BlockId) -> R) -> (Decl, R) {
        let mut decl = Decl::new();
        let mut idents = Namespace::new("test-identifiers");
        let body = decl.body;
        let result = {
            let mut eval = Evaluator {
                decl: &mut decl,
                idents: &mut idents,
            };
            f(&mut eval, body)
        };
        (decl, result)
    }

    fn local(eval: &mut Evaluator, name: &str, ctype: Type) -> Var {
        let id = eval
            .idents
            .add(Symbol::new(
                name.into(),
                ctype,
                SymbolKind::Definition,
                Linkage::None,
            ))
            .unwrap();
        Var::direct(id)
    }

    #[test]
    fn immediates_fold() {
        let (decl, result) = with_eval(|eval, block| {
            eval.expr(block, BinaryOp::Add, Var::int(2), Var::int(3))
                .unwrap()
        });
        assert_eq!(result.value(), Some(&Value::Int(5)));
        assert!(decl.block(decl.body).ops.is_empty());
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let (decl, result) = with_eval(|eval, block| {
            eval.expr(block, BinaryOp::Div, Var::int(1), Var::int(0))
                .unwrap()
        });
        assert!(!result.is_immediate());
        assert_eq!(decl.block(decl.body).ops.len(), 1);
    }

    #[test]
    fn comparisons_yield_int() {
        let (_, result) = with_eval(|eval, block| {
            eval.expr(block, BinaryOp::Gt, Var::int(4), Var::int(1))
                .unwrap()
        });
        assert_eq!(result.value(), Some(&Value::Int(1)));
        assert_eq!(result.ctype, Type::int());
    }

    #[test]
    fn pointer_addition_scales() {
        // p + 2 with int *p multiplies the index by sizeof(int)
        let (decl, result) = with_eval(|eval, block| {
            let p = local(eval, "p", Type::pointer(Type::int()));
            eval.expr(block, BinaryOp::Add, p, Var::int(2)).unwrap()
        });
        assert_eq!(result.ctype, Type::pointer(Type::int()));
        let ops = &decl.block(decl.body).ops;
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Op::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert_eq!(right.value(), Some(&Value::Int(8))),
            other => panic!("expected scaled add, got {}", other),
        }
    }

    #[test]
    fn pointer_difference_divides() {
        let (decl, result) = with_eval(|eval, block| {
            let p = local(eval, "p", Type::pointer(Type::int()));
            let q = local(eval, "q", Type::pointer(Type::int()));
            eval.expr(block, BinaryOp::Sub, p, q).unwrap()
        });
        assert_eq!(result.ctype, Type::integer(8));
        let ops = &decl.block(decl.body).ops;
        assert!(matches!(
            ops[0],
            Op::Binary {
                op: BinaryOp::Sub,
                ..
            }
        ));
        assert!(matches!(
            ops[1],
            Op::Binary {
                op: BinaryOp::Div,
                ..
            }
        ));
    }

    #[test]
    fn assign_requires_lvalue() {
        let (_, result) = with_eval(|eval, block| {
            eval.assign(block, Var::int(1), Var::int(2))
        });
        assert_eq!(result, Err(SemanticError::NotAssignable.into()));
    }

    #[test]
    fn addr_requires_lvalue() {
        let (_, result) = with_eval(|eval, block| eval.addr(block, Var::int(1)));
        assert_eq!(result, Err(SemanticError::NotAddressable.into()));
    }

    #[test]
    fn addr_of_deref_cancels() {
        let (decl, result) = with_eval(|eval, block| {
            let p = local(eval, "p", Type::pointer(Type::char()));
            let deref = eval.deref(block, p).unwrap();
            assert!(deref.lvalue);
            eval.addr(block, deref).unwrap()
        });
        assert_eq!(result.ctype, Type::pointer(Type::char()));
        assert!(decl.block(decl.body).ops.is_empty());
    }

    #[test]
    fn deref_requires_pointer() {
        let (_, result) = with_eval(|eval, block| {
            let x = local(eval, "x", Type::int());
            eval.deref(block, x)
        });
        assert_eq!(
            result,
            Err(SemanticError::NotAPointer(Type::int()).into())
        );
    }

    #[test]
    fn assignment_narrows_immediates() {
        let (decl, _) = with_eval(|eval, block| {
            let c = local(eval, "c", Type::char());
            eval.assign(block, c, Var::int(300)).unwrap()
        });
        match &decl.block(decl.body).ops[0] {
            Op::Assign { src, .. } => {
                assert_eq!(src.value(), Some(&Value::Int(44)));
                assert_eq!(src.ctype, Type::char());
            }
            other => panic!("expected assignment, got {}", other),
        }
    }

    #[test]
    fn usual_conversions() {
        let int = Type::int();
        let uint = Type::unsigned(4);
        let long = Type::integer(8);
        assert_eq!(usual_arithmetic_conversions(&Type::char(), &int), Some(int.clone()));
        assert_eq!(usual_arithmetic_conversions(&int, &uint), Some(uint.clone()));
        assert_eq!(usual_arithmetic_conversions(&uint, &long), Some(long.clone()));
        assert_eq!(
            usual_arithmetic_conversions(&int, &Type::real(4)),
            Some(Type::real(4))
        );
        assert_eq!(usual_arithmetic_conversions(&int, &Type::pointer(int.clone())), None);
    }

    #[test]
    fn cast_folds_constants() {
        let (decl, result) = with_eval(|eval, block| {
            eval.cast(block, Var::int(300), Type::char()).unwrap()
        });
        assert_eq!(result.value(), Some(&Value::Int(44)));
        assert!(decl.block(decl.body).ops.is_empty());
    }

    #[test]
    fn array_decays_to_pointer() {
        let (decl, result) = with_eval(|eval, block| {
            let a = local(
                eval,
                "a",
                Type::array(Type::int(), ArrayLength::Fixed(4)),
            );
            eval.rvalue(block, a).unwrap()
        });
        assert_eq!(result.ctype, Type::pointer(Type::int()));
        assert!(matches!(decl.block(decl.body).ops[0], Op::Addr { .. }));
    }
}
