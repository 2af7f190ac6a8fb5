//! The opcode dispatch loop.
//!
//! Each iteration records the instruction pointer into the context (so
//! exception handling can locate handlers), reads one opcode byte, views the
//! following bytes as that opcode's fixed-width operand record, executes the
//! effect, and advances. Control-flow opcodes assign the instruction pointer
//! directly; `returnvalue`/`returnvoid` exit the loop.

mod binary;
mod call;
mod exceptions;
mod memory;
mod props;

use super::op::Opcode;
use crate::{
    coerce,
    context::{AbcContext, CallContext, ScopeEntry},
    error::{RunResult, VmError, K_FILTER, K_INVALID_REGISTER},
    heap::Heap,
    method::{EarlyBinding, MethodId},
    value::Value,
};

/// Result of executing one method to completion.
#[derive(Debug)]
pub enum Return {
    /// The method ended with `returnvoid`.
    Void,
    /// The method ended with `returnvalue`; the caller owns one reference.
    Value(Value),
}

impl Return {
    /// The returned value, or `None` for void.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Void => None,
            Self::Value(v) => Some(v),
        }
    }
}

/// Outcome of a single opcode.
enum Step {
    Continue,
    Return(Return),
}

/// Fetches a u32 operand, advancing the instruction pointer.
macro_rules! fetch_u32 {
    ($self:expr, $method:expr, $ip:expr) => {{
        let v = read_u32($self.code($method), $ip)?;
        $ip += 4;
        v
    }};
}

/// Fetches a u64 operand (the rewritten 8-byte records).
macro_rules! fetch_u64 {
    ($self:expr, $method:expr, $ip:expr) => {{
        let v = read_u64($self.code($method), $ip)?;
        $ip += 8;
        v
    }};
}

pub(crate) fn read_u32(code: &[u8], pos: usize) -> RunResult<u32> {
    code.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
        .ok_or_else(|| VmError::parse_exception("truncated operand record"))
}

fn read_u64(code: &[u8], pos: usize) -> RunResult<u64> {
    code.get(pos..pos + 8)
        .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
        .ok_or_else(|| VmError::parse_exception("truncated operand record"))
}

fn read_f64(code: &[u8], pos: usize) -> RunResult<f64> {
    code.get(pos..pos + 8)
        .map(|b| f64::from_le_bytes(b.try_into().expect("8-byte slice")))
        .ok_or_else(|| VmError::parse_exception("truncated operand record"))
}

/// Maximum nested-invocation depth before a stack-overflow error.
const MAX_CALL_DEPTH: usize = 256;

/// The AVM2 interpreter.
///
/// Borrows the heap and the ABC context (constant pool, classes, methods,
/// application domain) for the duration of a top-level invocation; nested
/// calls recurse through the same interpreter.
pub struct Interpreter<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) ctx: &'a mut AbcContext,
    pub(crate) depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(heap: &'a mut Heap, ctx: &'a mut AbcContext) -> Self {
        Self { heap, ctx, depth: 0 }
    }

    #[inline]
    pub(crate) fn code(&self, method: MethodId) -> &[u8] {
        &self.ctx.methods[method.index()].body.code
    }

    /// Pushes a value, releasing it (rather than leaking a reference) when
    /// the operand stack is full.
    pub(crate) fn push_value(&mut self, context: &mut CallContext, value: Value) -> RunResult<()> {
        if context.stack_depth() >= context.max_stack() {
            value.drop_with_heap(self.heap);
            return Err(VmError::stack_overflow());
        }
        context.push(value)
    }

    /// Executes `method` on `context` until it returns or an uncaught error
    /// propagates. The caller owns the context and must tear it down
    /// afterwards in either case.
    pub fn execute(&mut self, method: MethodId, context: &mut CallContext) -> RunResult<Return> {
        let mut ip = context.exec_pos;
        loop {
            // Save the position of the opcode for exception handling.
            context.exec_pos = ip;
            let byte = *self
                .code(method)
                .get(ip)
                .ok_or_else(|| VmError::parse_exception("instruction pointer past end of code"))?;
            ip += 1;
            let opcode = Opcode::from_byte(byte).ok_or_else(|| {
                log::error!("not interpreted instruction @{ip}, dump {byte:#04x}");
                VmError::parse_exception(format!("unknown opcode {byte:#04x}"))
            })?;

            match self.step(opcode, method, context, &mut ip) {
                Ok(Step::Continue) => {}
                Ok(Step::Return(ret)) => {
                    self.ctx.methods[method.index()].body.exec_count += 1;
                    return Ok(ret);
                }
                Err(err) => {
                    // Either resumes at a handler target or propagates.
                    ip = self.dispatch_error(method, context, err)?;
                }
            }
        }
    }

    /// Executes one opcode. `ip` points just past the opcode byte on entry
    /// and must point at the next instruction on exit.
    #[allow(clippy::too_many_lines)]
    fn step(
        &mut self,
        opcode: Opcode,
        method: MethodId,
        context: &mut CallContext,
        ip: &mut usize,
    ) -> RunResult<Step> {
        match opcode {
            Opcode::Bkpt | Opcode::Nop => {}
            Opcode::BkptLine | Opcode::Timestamp => {
                *ip += 4;
            }
            Opcode::Throw => {
                let value = context.pop()?;
                return Err(self.make_thrown(value));
            }

            // === Control flow ===
            Opcode::Jump => {
                let dest = fetch_u32!(self, method, *ip);
                self.check_target(method, dest)?;
                *ip = dest as usize;
            }
            Opcode::IfTrue | Opcode::IfFalse => {
                let dest = fetch_u32!(self, method, *ip);
                let v = context.pop()?;
                let truthy = coerce::to_boolean(&v, self.heap, &self.ctx.pool);
                v.drop_with_heap(self.heap);
                let cond = if opcode == Opcode::IfTrue { truthy } else { !truthy };
                if cond {
                    self.check_target(method, dest)?;
                    *ip = dest as usize;
                }
            }
            Opcode::IfNlt
            | Opcode::IfNle
            | Opcode::IfNgt
            | Opcode::IfNge
            | Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfLe
            | Opcode::IfGt
            | Opcode::IfGe
            | Opcode::IfStrictEq
            | Opcode::IfStrictNe => {
                let dest = fetch_u32!(self, method, *ip);
                let rhs = context.pop()?;
                let lhs = context.pop()?;
                let cond = self.branch_condition(opcode, &lhs, &rhs);
                lhs.drop_with_heap(self.heap);
                rhs.drop_with_heap(self.heap);
                if cond {
                    self.check_target(method, dest)?;
                    *ip = dest as usize;
                }
            }
            Opcode::LookupSwitch => {
                let default_dest = fetch_u32!(self, method, *ip);
                log::trace!("switch default dest {default_dest}");
                let count = fetch_u32!(self, method, *ip);
                let index_value = context.pop()?;
                if !index_value.is_integer() {
                    let err = VmError::verify_error(
                        crate::error::K_ILLEGAL_DEFAULT_VALUE,
                        "lookupswitch index is not an integer",
                    );
                    index_value.drop_with_heap(self.heap);
                    return Err(err);
                }
                let index = coerce::to_uint32(&index_value, self.heap, &self.ctx.pool);
                index_value.drop_with_heap(self.heap);

                let mut dest = default_dest;
                if index <= count {
                    dest = read_u32(self.code(method), *ip + index as usize * 4)?;
                }
                self.check_target(method, dest)?;
                *ip = dest as usize;
            }
            Opcode::ReturnVoid => {
                log::trace!("returnVoid");
                return Ok(Step::Return(Return::Void));
            }
            Opcode::ReturnValue => {
                let ret = context.pop()?;
                log::trace!("returnValue {}", ret.to_debug_string(self.heap, &self.ctx.pool));
                return Ok(Step::Return(Return::Value(ret)));
            }

            // === Literal pushes ===
            Opcode::PushNull => self.push_value(context, Value::Null)?,
            Opcode::PushUndefined => self.push_value(context, Value::Undefined)?,
            Opcode::PushTrue => self.push_value(context, Value::abstract_b(true))?,
            Opcode::PushFalse => self.push_value(context, Value::abstract_b(false))?,
            Opcode::PushNan => self.push_value(context, Value::abstract_d(f64::NAN))?,
            Opcode::PushByte => {
                let t = *self
                    .code(method)
                    .get(*ip)
                    .ok_or_else(|| VmError::parse_exception("truncated operand record"))? as i8;
                *ip += 1;
                self.push_value(context, Value::abstract_i(i32::from(t)))?;
            }
            Opcode::PushShort => {
                // The ABC spec says u30 but the encoding is a full u32
                // (ASC-4181).
                let t = fetch_u32!(self, method, *ip);
                self.push_value(context, Value::abstract_i(t as i32))?;
            }
            Opcode::PushString => {
                let t = fetch_u32!(self, method, *ip);
                let id = self
                    .ctx
                    .pool
                    .string_at(t)
                    .ok_or_else(|| VmError::parse_exception(format!("string index {t} out of range")))?;
                self.push_value(context, Value::InternString(id))?;
            }
            Opcode::PushInt => {
                let t = fetch_u32!(self, method, *ip);
                let v = self
                    .ctx
                    .pool
                    .int(t)
                    .ok_or_else(|| VmError::parse_exception(format!("int index {t} out of range")))?;
                self.push_value(context, Value::abstract_i(v))?;
            }
            Opcode::PushUint => {
                let t = fetch_u32!(self, method, *ip);
                let v = self
                    .ctx
                    .pool
                    .uint(t)
                    .ok_or_else(|| VmError::parse_exception(format!("uint index {t} out of range")))?;
                self.push_value(context, Value::abstract_ui(v))?;
            }
            Opcode::PushDouble => {
                let t = read_f64(self.code(method), *ip)?;
                *ip += 8;
                self.push_value(context, Value::abstract_d(t))?;
            }
            Opcode::PushNamespace => {
                let t = fetch_u32!(self, method, *ip);
                self.op_push_namespace(context, t)?;
            }

            // === Stack manipulation ===
            Opcode::Pop => {
                let v = context.pop()?;
                v.drop_with_heap(self.heap);
            }
            Opcode::Dup => {
                let v = context.peek()?.copy_tag();
                let v = v.clone_with_heap(self.heap);
                self.push_value(context, v)?;
            }
            Opcode::Swap => context.swap_top()?,

            // === Locals ===
            Opcode::Kill => {
                let t = fetch_u32!(self, method, *ip) as usize;
                log::trace!("kill {t}");
                self.check_local(context, t)?;
                context.set_local(t, Value::Undefined, self.heap);
            }
            Opcode::GetLocal => {
                let i = fetch_u32!(self, method, *ip) as usize;
                self.op_get_local(context, i)?;
            }
            Opcode::GetLocal0 | Opcode::GetLocal1 | Opcode::GetLocal2 | Opcode::GetLocal3 => {
                self.op_get_local(context, opcode as usize & 3)?;
            }
            Opcode::SetLocal => {
                let i = fetch_u32!(self, method, *ip) as usize;
                self.op_set_local(context, i)?;
            }
            Opcode::SetLocal0 | Opcode::SetLocal1 | Opcode::SetLocal2 | Opcode::SetLocal3 => {
                self.op_set_local(context, opcode as usize & 3)?;
            }
            Opcode::IncLocal | Opcode::DecLocal => {
                let t = fetch_u32!(self, method, *ip) as usize;
                self.check_local(context, t)?;
                let n = coerce::to_number(context.local(t).expect("checked local"), self.heap, &self.ctx.pool);
                let delta = if opcode == Opcode::IncLocal { 1.0 } else { -1.0 };
                context.set_local(t, Value::abstract_d(n + delta), self.heap);
            }
            Opcode::IncLocalI | Opcode::DecLocalI => {
                let t = fetch_u32!(self, method, *ip) as usize;
                self.check_local(context, t)?;
                let n = coerce::to_int32(context.local(t).expect("checked local"), self.heap, &self.ctx.pool);
                let delta = if opcode == Opcode::IncLocalI { 1 } else { -1 };
                context.set_local(t, Value::abstract_i(n.wrapping_add(delta)), self.heap);
            }

            // === Scope ===
            Opcode::PushScope => self.op_push_scope(context, false)?,
            Opcode::PushWith => self.op_push_scope(context, true)?,
            Opcode::PopScope => {
                let entry = context.pop_scope_entry()?;
                entry.value.drop_with_heap(self.heap);
            }
            Opcode::GetGlobalScope => self.op_get_global_scope(context)?,
            Opcode::GetScopeObject => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_scope_object(context, t)?;
            }
            Opcode::GetScopeAtIndex => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_scope_at_index(context, t)?;
            }

            // === Naming and properties ===
            Opcode::FindPropStrict => {
                let t = fetch_u32!(self, method, *ip);
                self.op_find_property(context, t, true)?;
            }
            Opcode::FindProperty => {
                let t = fetch_u32!(self, method, *ip);
                self.op_find_property(context, t, false)?;
            }
            Opcode::FindDef => {
                let t = fetch_u32!(self, method, *ip);
                self.op_find_def(context, t)?;
            }
            Opcode::GetLex => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_lex(context, t)?;
            }
            Opcode::GetProperty => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_property(context, t)?;
            }
            Opcode::SetProperty => {
                let t = fetch_u32!(self, method, *ip);
                self.op_set_property(context, t, false)?;
            }
            Opcode::InitProperty => {
                let t = fetch_u32!(self, method, *ip);
                self.op_set_property(context, t, true)?;
            }
            Opcode::DeleteProperty => {
                let t = fetch_u32!(self, method, *ip);
                self.op_delete_property(context, t)?;
            }
            Opcode::GetSlot => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_slot(context, t)?;
            }
            Opcode::SetSlot => {
                let t = fetch_u32!(self, method, *ip);
                self.op_set_slot(context, t, true)?;
            }
            Opcode::SetSlotNoCoerce => {
                let t = fetch_u32!(self, method, *ip);
                log::trace!("setSlotNoCoerce {t}");
                self.op_set_slot(context, t, false)?;
            }
            Opcode::GetGlobalSlot => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_global_slot(context, t)?;
            }
            Opcode::SetGlobalSlot => {
                let t = fetch_u32!(self, method, *ip);
                self.op_set_global_slot(context, t)?;
            }
            Opcode::GetSuper => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_super(context, t)?;
            }
            Opcode::SetSuper => {
                let t = fetch_u32!(self, method, *ip);
                self.op_set_super(context, t)?;
            }
            Opcode::GetDescendants => {
                let t = fetch_u32!(self, method, *ip);
                self.op_get_descendants(context, t)?;
            }
            Opcode::In => self.op_in(context)?,

            // === Iteration ===
            Opcode::HasNext2 => {
                let t = fetch_u32!(self, method, *ip) as usize;
                let t2 = fetch_u32!(self, method, *ip) as usize;
                self.op_has_next2(context, t, t2)?;
            }
            Opcode::NextName => self.op_next(context, true)?,
            Opcode::NextValue => self.op_next(context, false)?,

            // === Construction ===
            Opcode::NewObject => {
                let t = fetch_u32!(self, method, *ip);
                self.op_new_object(context, t)?;
            }
            Opcode::NewArray => {
                let t = fetch_u32!(self, method, *ip);
                self.op_new_array(context, t)?;
            }
            Opcode::NewActivation => self.op_new_activation(context, method)?,
            Opcode::NewClass => {
                let t = fetch_u32!(self, method, *ip);
                self.op_new_class(context, t)?;
            }
            Opcode::NewCatch => {
                let t = fetch_u32!(self, method, *ip);
                self.op_new_catch(context, t)?;
            }
            Opcode::NewFunction => {
                let t = fetch_u32!(self, method, *ip);
                self.op_new_function(context, t)?;
            }

            // === Calls ===
            Opcode::Call => {
                let argc = fetch_u32!(self, method, *ip);
                self.op_call(context, argc)?;
            }
            Opcode::CallStatic => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_call_static(context, t, argc)?;
            }
            Opcode::CallProperty | Opcode::CallPropLex => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_call_property(context, t, argc, true)?;
            }
            Opcode::CallPropVoid => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_call_property(context, t, argc, false)?;
            }
            Opcode::CallSuper => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_call_super(context, t, argc, true)?;
            }
            Opcode::CallSuperVoid => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_call_super(context, t, argc, false)?;
            }
            Opcode::Construct => {
                let argc = fetch_u32!(self, method, *ip);
                self.op_construct(context, argc)?;
            }
            Opcode::ConstructProp => {
                let t = fetch_u32!(self, method, *ip);
                let argc = fetch_u32!(self, method, *ip);
                self.op_construct_prop(context, t, argc)?;
            }
            Opcode::ConstructSuper => {
                let argc = fetch_u32!(self, method, *ip);
                self.op_construct_super(context, argc)?;
            }
            Opcode::ConstructGenericType => {
                let t = fetch_u32!(self, method, *ip);
                self.op_construct_generic_type(context, t)?;
            }

            // === Conversions ===
            Opcode::ConvertS => self.op_convert_s(context)?,
            Opcode::ConvertI => self.op_convert_i(context)?,
            Opcode::ConvertU => self.op_convert_u(context)?,
            Opcode::ConvertD => self.op_convert_d(context)?,
            Opcode::ConvertB => self.op_convert_b(context)?,
            Opcode::ConvertO => self.op_convert_o(context)?,
            Opcode::CoerceA => {}
            Opcode::CoerceS => self.op_coerce_s(context)?,
            Opcode::CheckFilter => {
                let v = context.pop()?;
                v.drop_with_heap(self.heap);
                return Err(VmError::type_error(K_FILTER, "filter operator not supported"));
            }
            Opcode::EscXelem => self.op_esc_x(context, false)?,
            Opcode::EscXattr => self.op_esc_x(context, true)?,
            Opcode::AsType => {
                let t = fetch_u32!(self, method, *ip);
                self.op_as_type(context, t)?;
            }
            Opcode::IsType => {
                let t = fetch_u32!(self, method, *ip);
                self.op_is_type(context, t)?;
            }
            Opcode::AsTypeLate => self.op_as_type_late(context, true)?,
            Opcode::IsTypeLate => self.op_as_type_late(context, false)?,
            Opcode::InstanceOf => self.op_instance_of(context)?,
            Opcode::TypeOf => {
                let v = context.pop()?;
                let s = coerce::typeof_string(&v, self.heap);
                v.drop_with_heap(self.heap);
                let id = self.ctx.pool.intern(s);
                self.push_value(context, Value::InternString(id))?;
            }

            // === Self-rewriting sites ===
            Opcode::Coerce => self.op_coerce_once(context, method, ip)?,
            Opcode::CoerceEarly => {
                let slot = fetch_u64!(self, method, *ip);
                self.op_coerce_early(context, method, slot)?;
            }
            Opcode::GetLexOnce => self.op_get_lex_once(context, method, ip)?,
            Opcode::PushEarly => {
                let slot = fetch_u64!(self, method, *ip);
                self.op_push_early(context, method, slot)?;
            }

            // === Default XML namespace ===
            Opcode::Dxns => {
                let t = fetch_u32!(self, method, *ip);
                let id = self
                    .ctx
                    .pool
                    .string_at(t)
                    .ok_or_else(|| VmError::parse_exception(format!("string index {t} out of range")))?;
                context.set_default_xml_ns(Value::InternString(id), self.heap);
            }
            Opcode::DxnsLate => {
                let v = context.pop()?;
                let s = coerce::to_avm_string(&v, self.heap, &self.ctx.pool, &self.ctx.classes);
                v.drop_with_heap(self.heap);
                let ns = Value::abstract_s(self.heap, s);
                context.set_default_xml_ns(ns, self.heap);
            }

            // === Arithmetic, logic, comparisons ===
            Opcode::Negate => self.op_negate(context)?,
            Opcode::Increment => self.op_increment(context, 1)?,
            Opcode::Decrement => self.op_increment(context, -1)?,
            Opcode::Not => {
                let v = context.pop()?;
                let b = !coerce::to_boolean(&v, self.heap, &self.ctx.pool);
                v.drop_with_heap(self.heap);
                self.push_value(context, Value::abstract_b(b))?;
            }
            Opcode::BitNot => {
                let v = context.pop()?;
                let n = coerce::to_int32(&v, self.heap, &self.ctx.pool);
                v.drop_with_heap(self.heap);
                self.push_value(context, Value::abstract_i(!n))?;
            }
            Opcode::Add => self.op_add(context)?,
            Opcode::Subtract => self.op_subtract(context)?,
            Opcode::Multiply => self.op_multiply(context)?,
            Opcode::Divide => self.op_divide(context)?,
            Opcode::Modulo => self.op_modulo(context)?,
            Opcode::Lshift | Opcode::Rshift | Opcode::Urshift => self.op_shift(context, opcode)?,
            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => self.op_bitwise(context, opcode)?,
            Opcode::Equals
            | Opcode::StrictEquals
            | Opcode::LessThan
            | Opcode::LessEquals
            | Opcode::GreaterThan
            | Opcode::GreaterEquals => self.op_compare(context, opcode)?,
            Opcode::IncrementI => self.op_increment_i(context, 1)?,
            Opcode::DecrementI => self.op_increment_i(context, -1)?,
            Opcode::NegateI => {
                let v = context.pop()?;
                let n = coerce::to_int32(&v, self.heap, &self.ctx.pool);
                v.drop_with_heap(self.heap);
                self.push_value(context, Value::abstract_i(n.wrapping_neg()))?;
            }
            Opcode::AddI | Opcode::SubtractI | Opcode::MultiplyI => self.op_arith_i(context, opcode)?,
            Opcode::Sxi1 | Opcode::Sxi8 | Opcode::Sxi16 => self.op_sign_extend(context, opcode)?,

            // === Alchemy memory ===
            Opcode::Li8 | Opcode::Li16 | Opcode::Li32 | Opcode::Lf32 | Opcode::Lf64 => {
                self.op_load_memory(context, opcode)?;
            }
            Opcode::Si8 | Opcode::Si16 | Opcode::Si32 | Opcode::Sf32 | Opcode::Sf64 => {
                self.op_store_memory(context, opcode)?;
            }
        }
        Ok(Step::Continue)
    }

    /// Validates a branch target against the code length.
    fn check_target(&self, method: MethodId, dest: u32) -> RunResult<()> {
        if (dest as usize) < self.code(method).len() {
            Ok(())
        } else {
            Err(VmError::parse_exception(format!("branch target {dest} past end of code")))
        }
    }

    fn check_local(&self, context: &CallContext, index: usize) -> RunResult<()> {
        if index < context.local_count() {
            Ok(())
        } else {
            Err(VmError::verify_error(
                K_INVALID_REGISTER,
                format!("invalid register {index}"),
            ))
        }
    }

    fn branch_condition(&self, opcode: Opcode, lhs: &Value, rhs: &Value) -> bool {
        let heap = &*self.heap;
        let pool = &self.ctx.pool;
        match opcode {
            Opcode::IfLt => coerce::abstract_lt(lhs, rhs, heap, pool) == Some(true),
            Opcode::IfNlt => coerce::abstract_lt(lhs, rhs, heap, pool) != Some(true),
            Opcode::IfLe => coerce::abstract_lt(rhs, lhs, heap, pool) == Some(false),
            Opcode::IfNle => coerce::abstract_lt(rhs, lhs, heap, pool) != Some(false),
            Opcode::IfGt => coerce::abstract_lt(rhs, lhs, heap, pool) == Some(true),
            Opcode::IfNgt => coerce::abstract_lt(rhs, lhs, heap, pool) != Some(true),
            Opcode::IfGe => coerce::abstract_lt(lhs, rhs, heap, pool) == Some(false),
            Opcode::IfNge => coerce::abstract_lt(lhs, rhs, heap, pool) != Some(false),
            Opcode::IfEq => coerce::abstract_equals(lhs, rhs, heap, pool, &self.ctx.classes),
            Opcode::IfNe => !coerce::abstract_equals(lhs, rhs, heap, pool, &self.ctx.classes),
            Opcode::IfStrictEq => coerce::strict_equals(lhs, rhs, heap, pool),
            Opcode::IfStrictNe => !coerce::strict_equals(lhs, rhs, heap, pool),
            _ => unreachable!("not a two-operand branch"),
        }
    }

    // === Self-rewriting ===================================================

    /// `coerce`: resolves the multiname to a type, rewrites the site to
    /// `coerceearly` with the resolved type cached in the 8-byte operand
    /// record, then performs the coercion.
    fn op_coerce_once(&mut self, context: &mut CallContext, method: MethodId, ip: &mut usize) -> RunResult<()> {
        let t = read_u32(self.code(method), *ip)?;
        if self.code(method).len() < *ip + 8 {
            return Err(VmError::parse_exception("coerce operand record truncated"));
        }
        let type_ref = self.resolve_fixed_type(t)?;
        log::trace!("coerceOnce {t}");

        let body = &mut self.ctx.methods[method.index()].body;
        let slot = body.add_early_binding(EarlyBinding::Type(type_ref));
        // Rewrite this to a coerceearly.
        body.code[*ip - 1] = Opcode::CoerceEarly as u8;
        body.code[*ip..*ip + 8].copy_from_slice(&slot.to_le_bytes());

        let o = context.pop()?;
        let o = self.ctx.classes.coerce(type_ref, o, self.heap, &self.ctx.pool)?;
        self.push_value(context, o)?;
        *ip += 8;
        Ok(())
    }

    /// `coerceearly`: the rewritten form; applies the cached type directly.
    fn op_coerce_early(&mut self, context: &mut CallContext, method: MethodId, slot: u64) -> RunResult<()> {
        let binding = self.ctx.methods[method.index()]
            .body
            .early_bindings
            .get(slot as usize)
            .ok_or_else(|| VmError::parse_exception("coerceearly binding out of range"))?;
        let EarlyBinding::Type(type_ref) = binding else {
            return Err(VmError::parse_exception("coerceearly binding is not a type"));
        };
        let type_ref = *type_ref;
        log::trace!("coerceEarly");
        let o = context.pop()?;
        let o = self.ctx.classes.coerce(type_ref, o, self.heap, &self.ctx.pool)?;
        self.push_value(context, o)?;
        Ok(())
    }

    /// `getlexonce`: resolves a name in the application domain, pushes the
    /// result, and rewrites the site to `pushearly` with the value cached.
    fn op_get_lex_once(&mut self, context: &mut CallContext, method: MethodId, ip: &mut usize) -> RunResult<()> {
        let t = read_u32(self.code(method), *ip)?;
        if self.code(method).len() < *ip + 8 {
            return Err(VmError::parse_exception("getlexonce operand record truncated"));
        }
        let mut mn = self.resolve_multiname_fixed(t)?;
        log::trace!("getLexOnce {mn}");
        let obj = self
            .ctx
            .domain
            .lookup_global(self.heap, &mn.local)
            .ok_or_else(|| VmError::undefined_var(&mn.local))?;
        mn.reset_name_if_object(self.heap);

        // One reference goes to the cache, one to the stack.
        let cached = obj.clone_with_heap(self.heap);
        let body = &mut self.ctx.methods[method.index()].body;
        let slot = body.add_early_binding(EarlyBinding::Value(cached));
        // Rewrite this to a pushearly.
        body.code[*ip - 1] = Opcode::PushEarly as u8;
        body.code[*ip..*ip + 8].copy_from_slice(&slot.to_le_bytes());

        self.push_value(context, obj)?;
        *ip += 8;
        Ok(())
    }

    /// `pushearly`: pushes the cached value with a fresh reference.
    fn op_push_early(&mut self, context: &mut CallContext, method: MethodId, slot: u64) -> RunResult<()> {
        let binding = self.ctx.methods[method.index()]
            .body
            .early_bindings
            .get(slot as usize)
            .ok_or_else(|| VmError::parse_exception("pushearly binding out of range"))?;
        let EarlyBinding::Value(v) = binding else {
            return Err(VmError::parse_exception("pushearly binding is not a value"));
        };
        let v = v.copy_tag();
        log::trace!("pushEarly");
        let v = v.clone_with_heap(self.heap);
        self.push_value(context, v)?;
        Ok(())
    }

    // === Small shared helpers =============================================

    pub(crate) fn op_get_local(&mut self, context: &mut CallContext, i: usize) -> RunResult<()> {
        self.check_local(context, i)?;
        let v = context.local(i).expect("checked local").copy_tag();
        log::trace!("getLocal {i}: {}", v.to_debug_string(self.heap, &self.ctx.pool));
        let v = v.clone_with_heap(self.heap);
        self.push_value(context, v)
    }

    pub(crate) fn op_set_local(&mut self, context: &mut CallContext, i: usize) -> RunResult<()> {
        log::trace!("setLocal {i}");
        self.check_local(context, i)?;
        let obj = context.pop()?;
        // Writes to the rest-argument slot are suppressed unless the value
        // is itself an Array, preserving the rest-arguments contract.
        if context.argarrayposition != Some(i) || obj.is_array(self.heap) {
            context.set_local(i, obj, self.heap);
        } else {
            obj.drop_with_heap(self.heap);
        }
        Ok(())
    }

    fn op_push_scope(&mut self, context: &mut CallContext, is_with: bool) -> RunResult<()> {
        let v = context.pop()?;
        if v.is_null() {
            v.drop_with_heap(self.heap);
            return Err(VmError::convert_null_to_object());
        }
        if v.is_undefined() {
            v.drop_with_heap(self.heap);
            return Err(VmError::convert_undefined_to_object());
        }
        if context.scope_depth() >= context.max_scope_depth() {
            v.drop_with_heap(self.heap);
            return Err(VmError::verify_error(
                crate::error::K_SCOPE_STACK_OVERFLOW,
                "scope stack overflow",
            ));
        }
        context.push_scope_entry(ScopeEntry { value: v, is_with })
    }
}
