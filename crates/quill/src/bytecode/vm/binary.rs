//! Binary and unary operator dispatch, plus runtime type tests.
//!
//! Numeric operands evaluate natively with int-to-float promotion. Objects
//! dispatch to an attribute named for the operator token itself, so `x + y`
//! calls `x."+"(y)`. Equality is special: it never raises on natives,
//! falling back to identity and structural comparison so values without an
//! overload still compare.

use crate::{
    ast::{BinOp, UnaryOp},
    exception::{RunError, RunResult},
    heap::HeapData,
    intern::{StaticStrings, StringId},
    io::PrintWriter,
    tracer::VmTracer,
    value::{concat_strings, values_equal, Value},
};

use super::Vm;

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        _ => unreachable!("caller checked for a numeric operand"),
    }
}

/// The attribute name an operator dispatches to.
fn op_attr(op: BinOp) -> StaticStrings {
    match op {
        BinOp::Add => StaticStrings::OpAdd,
        BinOp::Sub => StaticStrings::OpSub,
        BinOp::Mul => StaticStrings::OpMul,
        BinOp::Div => StaticStrings::OpDiv,
        BinOp::Mod => StaticStrings::OpMod,
        BinOp::Eq => StaticStrings::OpEq,
        BinOp::Ne => StaticStrings::OpNe,
        BinOp::Lt => StaticStrings::OpLt,
        BinOp::Le => StaticStrings::OpLe,
        BinOp::Gt => StaticStrings::OpGt,
        BinOp::Ge => StaticStrings::OpGe,
    }
}

impl<P: PrintWriter, T: VmTracer> Vm<'_, P, T> {
    pub(crate) fn binary_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if matches!(op, BinOp::Eq | BinOp::Ne) {
            return self.equality(op, lhs, rhs);
        }
        if let Some(result) = self.numeric_op(op, lhs, rhs)? {
            return Ok(result);
        }
        if op == BinOp::Add {
            if let Some(result) = concat_strings(lhs, rhs, &mut self.ctx.heap, &self.ctx.interns) {
                return Ok(result);
            }
        }
        if matches!(op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
            let a = lhs.as_str(&self.ctx.heap, &self.ctx.interns).map(str::to_owned);
            let b = rhs.as_str(&self.ctx.heap, &self.ctx.interns).map(str::to_owned);
            if let (Some(a), Some(b)) = (a, b) {
                return Ok(Value::Bool(match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                }));
            }
        }
        if let Some(result) = self.dispatch_operator(lhs, op_attr(op).into(), rhs)? {
            return Ok(result);
        }
        Err(self.bad_operands(op, lhs, rhs))
    }

    /// Equality and inequality. Objects may overload `"=="`/`"!="`; every
    /// other combination falls back to identity and structural comparison
    /// and never raises, so enum variants and plain values always compare.
    fn equality(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if let Some(result) = self.dispatch_operator(lhs, op_attr(op).into(), rhs)? {
            return Ok(result);
        }
        if op == BinOp::Ne {
            // No "!=" overload: negate "==" when overloaded, else structural.
            if let Some(result) = self.dispatch_operator(lhs, StaticStrings::OpEq.into(), rhs)? {
                let truthy = result.is_truthy(&self.ctx.heap, &self.ctx.interns);
                return Ok(Value::Bool(!truthy));
            }
            return Ok(Value::Bool(!values_equal(lhs, rhs, &self.ctx.heap, &self.ctx.interns)));
        }
        Ok(Value::Bool(values_equal(lhs, rhs, &self.ctx.heap, &self.ctx.interns)))
    }

    /// Native arithmetic and comparison over int and float operands.
    /// Returns `None` when either operand is not numeric.
    fn numeric_op(&self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        let result = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                match op {
                    BinOp::Add => Value::Int(a.wrapping_add(b)),
                    BinOp::Sub => Value::Int(a.wrapping_sub(b)),
                    BinOp::Mul => Value::Int(a.wrapping_mul(b)),
                    // Integer division truncates toward zero.
                    BinOp::Div => Value::Int(a.checked_div(b).ok_or_else(|| RunError::runtime("division by zero"))?),
                    BinOp::Mod => Value::Int(a.checked_rem(b).ok_or_else(|| RunError::runtime("modulo by zero"))?),
                    BinOp::Lt => Value::Bool(a < b),
                    BinOp::Le => Value::Bool(a <= b),
                    BinOp::Gt => Value::Bool(a > b),
                    BinOp::Ge => Value::Bool(a >= b),
                    BinOp::Eq | BinOp::Ne => unreachable!("handled by equality"),
                }
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = as_f64(lhs);
                let b = as_f64(rhs);
                match op {
                    BinOp::Add => Value::Float(a + b),
                    BinOp::Sub => Value::Float(a - b),
                    BinOp::Mul => Value::Float(a * b),
                    BinOp::Div => Value::Float(a / b),
                    BinOp::Mod => Value::Float(a % b),
                    BinOp::Lt => Value::Bool(a < b),
                    BinOp::Le => Value::Bool(a <= b),
                    BinOp::Gt => Value::Bool(a > b),
                    BinOp::Ge => Value::Bool(a >= b),
                    BinOp::Eq | BinOp::Ne => unreachable!("handled by equality"),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    /// Invokes an operator overload on an object receiver, or reports that
    /// none exists.
    fn dispatch_operator(&mut self, receiver: &Value, name: StringId, rhs: &Value) -> RunResult<Option<Value>> {
        let Value::Ref(id) = receiver else {
            return Ok(None);
        };
        if !matches!(self.ctx.heap.get(*id), HeapData::Object(_)) {
            return Ok(None);
        }
        if !self.has_member(*id, name) {
            return Ok(None);
        }
        let callee = self.get_attribute(receiver, name)?;
        self.invoke_value(callee, vec![rhs.clone()]).map(Some)
    }

    fn bad_operands(&self, op: BinOp, lhs: &Value, rhs: &Value) -> RunError {
        let token: &'static str = op_attr(op).into();
        let message = format!(
            "unsupported operands for '{token}': '{}' and '{}'",
            lhs.type_name(&self.ctx.heap),
            rhs.type_name(&self.ctx.heap)
        );
        if matches!(lhs, Value::Ref(id) if matches!(self.ctx.heap.get(*id), HeapData::Object(_))) {
            RunError::not_supported(message)
        } else {
            RunError::type_error(message)
        }
    }

    pub(crate) fn unary_op(&mut self, op: UnaryOp, operand: &Value) -> RunResult<Value> {
        match op {
            UnaryOp::Neg => match operand {
                Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                Value::Float(v) => Ok(Value::Float(-v)),
                _ => {
                    if let Some(result) = self.dispatch_unary(operand, StaticStrings::OpNeg.into())? {
                        return Ok(result);
                    }
                    Err(RunError::type_error(format!(
                        "cannot negate '{}'",
                        operand.type_name(&self.ctx.heap)
                    )))
                }
            },
            UnaryOp::Not => {
                if let Some(result) = self.dispatch_unary(operand, StaticStrings::OpNot.into())? {
                    return Ok(result);
                }
                Ok(Value::Bool(!operand.is_truthy(&self.ctx.heap, &self.ctx.interns)))
            }
        }
    }

    fn dispatch_unary(&mut self, receiver: &Value, name: StringId) -> RunResult<Option<Value>> {
        let Value::Ref(id) = receiver else {
            return Ok(None);
        };
        if !matches!(self.ctx.heap.get(*id), HeapData::Object(_)) || !self.has_member(*id, name) {
            return Ok(None);
        }
        let callee = self.get_attribute(receiver, name)?;
        self.invoke_value(callee, Vec::new()).map(Some)
    }

    /// Runtime type test behind `is` patterns and handler filters.
    pub(crate) fn is_instance(&self, subject: &Value, type_value: &Value) -> RunResult<bool> {
        match type_value {
            Value::ExcType(kind) => Ok(self
                .exception_kind_of(subject)
                .is_some_and(|k| k.matches_handler(*kind))),
            Value::Ref(type_id) => match self.ctx.heap.get(*type_id) {
                HeapData::Class(_) => Ok(self.instance_chain_has_class(subject, *type_id)),
                HeapData::Interface(_) => Ok(self.instance_chain_has_marker(subject, *type_id)),
                HeapData::Enum(_) => Ok(match subject {
                    Value::Ref(id) => match self.ctx.heap.get(*id) {
                        HeapData::Object(object) => object.class == Some(*type_id),
                        _ => false,
                    },
                    _ => false,
                }),
                _ => Err(self.not_a_type(type_value)),
            },
            _ => Err(self.not_a_type(type_value)),
        }
    }

    /// Whether the subject or any delegate on its chain is an instance of
    /// the class.
    fn instance_chain_has_class(&self, subject: &Value, class_id: crate::heap::HeapId) -> bool {
        let Value::Ref(id) = subject else { return false };
        let mut current = Some(*id);
        while let Some(id) = current {
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                return false;
            };
            if object.class == Some(class_id) {
                return true;
            }
            current = object.base;
        }
        false
    }

    fn instance_chain_has_marker(&self, subject: &Value, marker: crate::heap::HeapId) -> bool {
        let Value::Ref(id) = subject else { return false };
        let mut current = Some(*id);
        while let Some(id) = current {
            let HeapData::Object(object) = self.ctx.heap.get(id) else {
                return false;
            };
            if object.markers.contains(&marker) {
                return true;
            }
            current = object.base;
        }
        false
    }

    fn not_a_type(&self, value: &Value) -> RunError {
        RunError::type_error(format!(
            "'{}' is not a class, interface, enum, or exception type",
            value.type_name(&self.ctx.heap)
        ))
    }
}
