//! Exception handling: `throw`, handler-table search, and the transfer of
//! control into a matching handler.

use super::Interpreter;
use crate::{
    coerce,
    context::CallContext,
    error::{ErrorKind, RunResult, VmError},
    heap::HeapData,
    method::MethodId,
    object::ScriptObject,
    value::Value,
};

impl Interpreter<'_> {
    /// Wraps a value popped by the `throw` opcode. Ownership of the value
    /// moves into the error and travels with it until a handler takes it.
    pub(super) fn make_thrown(&mut self, value: Value) -> VmError {
        let message = coerce::to_avm_string(&value, self.heap, &self.ctx.pool, &self.ctx.classes);
        VmError::thrown(value, message)
    }

    /// Routes a raised error: when a handler in this frame covers the
    /// faulting `exec_pos` and matches the error kind, the operand stack is
    /// cleared, the error value is pushed, and execution resumes at the
    /// handler target (the returned instruction pointer). Otherwise the
    /// error propagates to the caller.
    pub(super) fn dispatch_error(
        &mut self,
        method: MethodId,
        context: &mut CallContext,
        mut error: VmError,
    ) -> RunResult<usize> {
        if error.kind == ErrorKind::ParseException {
            return Err(error);
        }
        let pos = u32::try_from(context.exec_pos).unwrap_or(u32::MAX);
        let Some(handler) = self.ctx.methods[method.index()].body.find_handler(pos, error.kind) else {
            return Err(error);
        };
        let target = handler.target as usize;

        context.clear_stack(self.heap);
        let error_value = match error.take_payload() {
            Some(v) => v,
            None => self.materialize_error(&error),
        };
        // The stack was just cleared, so this cannot overflow.
        context.push(error_value).expect("cleared stack has room");
        Ok(target)
    }

    /// Builds the catchable error object for errors raised by the opcode
    /// primitives themselves (as opposed to `throw`).
    fn materialize_error(&mut self, error: &VmError) -> Value {
        let mut obj = ScriptObject::dynamic_object();
        let kind_name: &'static str = error.kind.into();
        let name_id = self.ctx.pool.intern(kind_name);
        obj.set_dynamic("name", Value::InternString(name_id));
        obj.set_dynamic("errorID", Value::abstract_i(error.code as i32));
        let message = Value::abstract_s(self.heap, error.message.clone());
        obj.set_dynamic("message", message);
        Value::Ref(self.heap.allocate(HeapData::Object(obj)))
    }
}
