//! Arithmetic, bitwise, and comparison opcodes.
//!
//! Binary arithmetic keeps the integer fast path: when both operands are
//! Integer, UInteger, or integral Number, the operation runs in 64-bit signed
//! integers and the result is boxed as an integral Number. Division always
//! widens to double.

use super::{Interpreter, Opcode};
use crate::{
    coerce,
    context::CallContext,
    error::RunResult,
    value::Value,
};

impl Interpreter<'_> {
    /// `add`: integral fast path, then the ECMA ToPrimitive behavior (string
    /// concatenation wins when either primitive is a string).
    pub(super) fn op_add(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;

        let ret = if v1.is_integral() && v2.is_integral() {
            let num1 = coerce::to_int64(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_int64(&v2, self.heap, &self.ctx.pool);
            log::trace!("addI {num1}+{num2}");
            Value::abstract_di(num1.wrapping_add(num2))
        } else {
            use crate::coerce::Primitive;
            let p1 = coerce::to_primitive(&v1, self.heap, &self.ctx.pool, &self.ctx.classes);
            let p2 = coerce::to_primitive(&v2, self.heap, &self.ctx.pool, &self.ctx.classes);
            match (&p1, &p2) {
                (Primitive::Str(s1), _) => {
                    let mut out = s1.clone();
                    out.push_str(&primitive_string(&p2));
                    Value::abstract_s(self.heap, out)
                }
                (_, Primitive::Str(s2)) => {
                    let mut out = primitive_string(&p1);
                    out.push_str(s2);
                    Value::abstract_s(self.heap, out)
                }
                _ => {
                    let n1 = primitive_number(&p1);
                    let n2 = primitive_number(&p2);
                    Value::abstract_d(n1 + n2)
                }
            }
        };

        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    pub(super) fn op_subtract(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;

        // If both values are Integers or int Numbers the result is also an
        // int Number.
        let ret = if v1.is_integral() && v2.is_integral() {
            let num1 = coerce::to_int64(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_int64(&v2, self.heap, &self.ctx.pool);
            log::trace!("subtractI {num1}-{num2}");
            Value::abstract_di(num1.wrapping_sub(num2))
        } else {
            let num1 = coerce::to_number(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_number(&v2, self.heap, &self.ctx.pool);
            Value::abstract_d(num1 - num2)
        };

        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    pub(super) fn op_multiply(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;

        let ret = if v1.is_integral() && v2.is_integral() {
            let num1 = coerce::to_int64(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_int64(&v2, self.heap, &self.ctx.pool);
            log::trace!("multiplyI {num1}*{num2}");
            Value::abstract_di(num1.wrapping_mul(num2))
        } else {
            let num1 = coerce::to_number(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_number(&v2, self.heap, &self.ctx.pool);
            Value::abstract_d(num1 * num2)
        };

        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    /// `divide` always computes in doubles.
    pub(super) fn op_divide(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;
        let num1 = coerce::to_number(&v1, self.heap, &self.ctx.pool);
        let num2 = coerce::to_number(&v2, self.heap, &self.ctx.pool);
        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_d(num1 / num2))
    }

    /// `modulo`: integral fast path with NaN on a zero divisor. The slow
    /// path reproduces the original operand routing, which reaches fmod in
    /// the opposite order from the integer path; kept as-is.
    pub(super) fn op_modulo(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;

        let ret = if v1.is_integral() && v2.is_integral() {
            let num1 = coerce::to_int64(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_int64(&v2, self.heap, &self.ctx.pool);
            log::trace!("moduloI {num1}%{num2}");
            if num2 == 0 {
                Value::abstract_d(f64::NAN)
            } else {
                Value::abstract_di(num1.wrapping_rem(num2))
            }
        } else {
            let num1 = coerce::to_number(&v1, self.heap, &self.ctx.pool);
            let num2 = coerce::to_number(&v2, self.heap, &self.ctx.pool);
            Value::abstract_d(num2 % num1)
        };

        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    /// `lshift`/`rshift`/`urshift`: the shift count is on top of the stack
    /// and is masked to five bits.
    pub(super) fn op_shift(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let shift_v = context.pop()?;
        let value_v = context.pop()?;
        let shift = coerce::to_uint32(&shift_v, self.heap, &self.ctx.pool) & 0x1f;
        let ret = match opcode {
            Opcode::Lshift => {
                let v = coerce::to_int32(&value_v, self.heap, &self.ctx.pool);
                v.wrapping_shl(shift)
            }
            Opcode::Rshift => {
                let v = coerce::to_int32(&value_v, self.heap, &self.ctx.pool);
                v.wrapping_shr(shift)
            }
            Opcode::Urshift => {
                let v = coerce::to_uint32(&value_v, self.heap, &self.ctx.pool);
                (v >> shift) as i32
            }
            _ => unreachable!("not a shift"),
        };
        shift_v.drop_with_heap(self.heap);
        value_v.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_i(ret))
    }

    pub(super) fn op_bitwise(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let v1 = context.pop()?;
        let v2 = context.pop()?;
        let i1 = coerce::to_int32(&v1, self.heap, &self.ctx.pool);
        let i2 = coerce::to_int32(&v2, self.heap, &self.ctx.pool);
        let ret = match opcode {
            Opcode::BitAnd => i1 & i2,
            Opcode::BitOr => i1 | i2,
            Opcode::BitXor => i1 ^ i2,
            _ => unreachable!("not a bitwise op"),
        };
        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_i(ret))
    }

    pub(super) fn op_compare(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;
        let heap = &*self.heap;
        let pool = &self.ctx.pool;
        let ret = match opcode {
            Opcode::Equals => coerce::abstract_equals(&v1, &v2, heap, pool, &self.ctx.classes),
            Opcode::StrictEquals => coerce::strict_equals(&v1, &v2, heap, pool),
            Opcode::LessThan => coerce::abstract_lt(&v1, &v2, heap, pool) == Some(true),
            Opcode::LessEquals => coerce::abstract_lt(&v2, &v1, heap, pool) == Some(false),
            Opcode::GreaterThan => coerce::abstract_lt(&v2, &v1, heap, pool) == Some(true),
            Opcode::GreaterEquals => coerce::abstract_lt(&v1, &v2, heap, pool) == Some(false),
            _ => unreachable!("not a comparison"),
        };
        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_b(ret))
    }

    /// `negate`: integral nonzero values that fit in 32 bits stay integral.
    pub(super) fn op_negate(&mut self, context: &mut CallContext) -> RunResult<()> {
        let val = context.pop()?;
        let i = coerce::to_int64(&val, self.heap, &self.ctx.pool);
        let ret = if val.is_integral() && i != 0 && i == i64::from(coerce::to_int32(&val, self.heap, &self.ctx.pool)) {
            Value::abstract_di(-i)
        } else {
            Value::abstract_d(-coerce::to_number(&val, self.heap, &self.ctx.pool))
        };
        val.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    /// `increment`/`decrement`. Increment keeps UInteger inputs on the
    /// double path; decrement accepts them in the integral path.
    pub(super) fn op_increment(&mut self, context: &mut CallContext, delta: i64) -> RunResult<()> {
        let val = context.pop()?;
        let integral = if delta > 0 {
            val.is_integer() || (val.is_number() && val.is_integral())
        } else {
            val.is_integral()
        };
        let ret = if integral {
            let n = coerce::to_int64(&val, self.heap, &self.ctx.pool);
            Value::abstract_di(n.wrapping_add(delta))
        } else {
            let n = coerce::to_number(&val, self.heap, &self.ctx.pool);
            Value::abstract_d(n + delta as f64)
        };
        val.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    pub(super) fn op_increment_i(&mut self, context: &mut CallContext, delta: i32) -> RunResult<()> {
        let val = context.pop()?;
        let n = coerce::to_int32(&val, self.heap, &self.ctx.pool);
        val.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_i(n.wrapping_add(delta)))
    }

    /// `add_i`/`subtract_i`/`multiply_i`: 32-bit modular arithmetic.
    pub(super) fn op_arith_i(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let v2 = context.pop()?;
        let v1 = context.pop()?;
        let num1 = coerce::to_int32(&v1, self.heap, &self.ctx.pool);
        let num2 = coerce::to_int32(&v2, self.heap, &self.ctx.pool);
        let ret = match opcode {
            Opcode::AddI => num1.wrapping_add(num2),
            Opcode::SubtractI => num1.wrapping_sub(num2),
            Opcode::MultiplyI => num1.wrapping_mul(num2),
            _ => unreachable!("not integer arithmetic"),
        };
        v1.drop_with_heap(self.heap);
        v2.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_i(ret))
    }

    /// `sxi1`/`sxi8`/`sxi16`: sign-extend from a narrow width.
    pub(super) fn op_sign_extend(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let arg = context.pop()?;
        let u = coerce::to_uint32(&arg, self.heap, &self.ctx.pool);
        arg.drop_with_heap(self.heap);
        let ret = match opcode {
            Opcode::Sxi1 => (u & 0x1) as i32,
            Opcode::Sxi8 => i32::from(u as u8 as i8),
            Opcode::Sxi16 => i32::from(u as u16 as i16),
            _ => unreachable!("not a sign extension"),
        };
        self.push_value(context, Value::abstract_i(ret))
    }
}

fn primitive_string(p: &coerce::Primitive) -> String {
    match p {
        coerce::Primitive::Str(s) => s.clone(),
        coerce::Primitive::Number(n) => coerce::number_to_string(*n),
        coerce::Primitive::Bool(b) => b.to_string(),
        coerce::Primitive::Null => "null".to_string(),
        coerce::Primitive::Undefined => "undefined".to_string(),
    }
}

fn primitive_number(p: &coerce::Primitive) -> f64 {
    match p {
        coerce::Primitive::Str(s) => coerce::string_to_number(s),
        coerce::Primitive::Number(n) => *n,
        coerce::Primitive::Bool(b) => f64::from(u8::from(*b)),
        coerce::Primitive::Null => 0.0,
        coerce::Primitive::Undefined => f64::NAN,
    }
}
