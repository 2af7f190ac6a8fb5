//! Method invocation: the call*/construct* opcode family.
//!
//! Each call pops its arguments in forward order, then the receiver (or the
//! type for construct*), resolves the target, builds a nested call context,
//! and recursively invokes the interpreter. The `*void` variants discard the
//! return value; the pushing variants push Undefined for a void return.

use super::{Interpreter, Return, MAX_CALL_DEPTH};
use crate::{
    class::{ClassId, ClassKind, TraitKind, TypeRef},
    context::{CallContext, ScopeEntry},
    error::{
        RunResult, VmError, K_CONSTRUCT_OF_NON_FUNCTION, K_STACK_OVERFLOW, K_TYPE_APP_OF_NON_PARAM,
        K_WRONG_ARGUMENT_COUNT,
    },
    heap::HeapData,
    method::MethodId,
    object::{ArrayData, ScriptObject},
    value::Value,
};

impl Interpreter<'_> {
    /// Pops `argc` arguments, restoring forward order.
    fn pop_args(&mut self, context: &mut CallContext, argc: u32) -> RunResult<Vec<Value>> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            match context.pop() {
                Ok(v) => args.push(v),
                Err(e) => {
                    self.drop_values(args);
                    return Err(e);
                }
            }
        }
        args.reverse();
        Ok(args)
    }

    pub(super) fn drop_values(&mut self, values: Vec<Value>) {
        for v in values {
            v.drop_with_heap(self.heap);
        }
    }

    /// Invokes a method with an owned receiver and arguments, returning the
    /// method's result. The nested context is torn down here in both the
    /// success and error paths.
    pub fn call_method(
        &mut self,
        method: MethodId,
        this: Value,
        args: Vec<Value>,
        parent_scope: Vec<ScopeEntry>,
    ) -> RunResult<Return> {
        if self.depth >= MAX_CALL_DEPTH {
            this.drop_with_heap(self.heap);
            self.drop_values(args);
            for entry in parent_scope {
                entry.value.drop_with_heap(self.heap);
            }
            return Err(VmError::verify_error(K_STACK_OVERFLOW, "call stack exhausted"));
        }

        let info = &self.ctx.methods[method.index()];
        let param_count = info.param_count;
        let needs_rest = info.needs_rest;
        let body = &info.body;
        // Room for this, the declared parameters, and the rest array even if
        // the body under-declares.
        let rest_slot = param_count + 1;
        let local_count = body
            .local_count
            .max(1 + param_count)
            .max(if needs_rest { rest_slot + 1 } else { 0 });
        let mut nested = CallContext::new(body.max_stack, local_count, body.max_scope_depth);
        nested.set_local(0, this, self.heap);
        nested.set_parent_scope(parent_scope);

        let mut rest = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < param_count {
                nested.set_local(1 + i, arg, self.heap);
            } else if needs_rest {
                rest.push(arg);
            } else {
                arg.drop_with_heap(self.heap);
            }
        }
        if needs_rest {
            let id = self.heap.allocate(HeapData::Array(ArrayData::with_values(rest)));
            nested.set_local(rest_slot, Value::Ref(id), self.heap);
            nested.argarrayposition = Some(rest_slot);
        }

        self.depth += 1;
        let result = self.execute(method, &mut nested);
        self.depth -= 1;
        nested.teardown(self.heap);
        result
    }

    /// Calls a callable value: a function closure or a class (explicit
    /// coercion). Consumes `func`, `this`, and `args`.
    fn call_value(&mut self, func: Value, this: Value, args: Vec<Value>) -> RunResult<Return> {
        match &func {
            Value::Ref(id) => {
                let (method, captured) = match self.heap.get(*id) {
                    HeapData::Function(f) => {
                        let entries: Vec<ScopeEntry> = f
                            .captured_scope
                            .iter()
                            .map(|e| ScopeEntry {
                                value: e.value.copy_tag(),
                                is_with: e.is_with,
                            })
                            .collect();
                        (f.method, entries)
                    }
                    _ => {
                        let err = self.not_callable(&func);
                        func.drop_with_heap(self.heap);
                        this.drop_with_heap(self.heap);
                        self.drop_values(args);
                        return Err(err);
                    }
                };
                for entry in &captured {
                    if let Value::Ref(id) = &entry.value {
                        self.heap.inc_ref(*id);
                    }
                }
                let result = self.call_method(method, this, args, captured);
                func.drop_with_heap(self.heap);
                result
            }
            // Calling a class converts the single argument to that type.
            Value::Class(cid) => {
                let cid = *cid;
                this.drop_with_heap(self.heap);
                if args.len() != 1 {
                    self.drop_values(args);
                    return Err(VmError::argument_error(
                        K_WRONG_ARGUMENT_COUNT,
                        "conversion call expects exactly 1 argument",
                    ));
                }
                let arg = args.into_iter().next().expect("one argument");
                let converted = self
                    .ctx
                    .classes
                    .coerce(TypeRef::Class(cid), arg, self.heap, &self.ctx.pool)?;
                Ok(Return::Value(converted))
            }
            _ => {
                let err = self.not_callable(&func);
                func.drop_with_heap(self.heap);
                this.drop_with_heap(self.heap);
                self.drop_values(args);
                Err(err)
            }
        }
    }

    fn not_callable(&self, value: &Value) -> VmError {
        VmError::not_a_function(&value.to_debug_string(self.heap, &self.ctx.pool))
    }

    /// Pushes a call result; void returns surface as Undefined.
    fn push_result(&mut self, context: &mut CallContext, ret: Return) -> RunResult<()> {
        match ret {
            Return::Value(v) => self.push_value(context, v),
            Return::Void => self.push_value(context, Value::Undefined),
        }
    }

    fn discard_result(&mut self, ret: Return) {
        if let Return::Value(v) = ret {
            v.drop_with_heap(self.heap);
        }
    }

    // === Opcodes ==========================================================

    /// `call(argc)`: stack is [function, receiver, args...].
    pub(super) fn op_call(&mut self, context: &mut CallContext, argc: u32) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let receiver = context.pop()?;
        let func = context.pop()?;
        let ret = self.call_value(func, receiver, args)?;
        self.push_result(context, ret)
    }

    /// `callstatic(method, argc)`: direct method-table dispatch.
    pub(super) fn op_call_static(&mut self, context: &mut CallContext, method_index: u32, argc: u32) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let receiver = context.pop()?;
        if (method_index as usize) >= self.ctx.methods.len() {
            receiver.drop_with_heap(self.heap);
            self.drop_values(args);
            return Err(VmError::parse_exception(format!(
                "method index {method_index} out of range"
            )));
        }
        let ret = self.call_method(MethodId(method_index), receiver, args, Vec::new())?;
        self.push_result(context, ret)
    }

    /// `callproperty`/`callproplex`/`callpropvoid`. The lex variant is
    /// treated identically to `callproperty`.
    pub(super) fn op_call_property(
        &mut self,
        context: &mut CallContext,
        index: u32,
        argc: u32,
        keep_return: bool,
    ) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = match context.pop() {
            Ok(o) => o,
            Err(e) => {
                mn.reset_name_if_object(self.heap);
                self.drop_values(args);
                return Err(e);
            }
        };

        // Trait methods dispatch directly; anything else goes through the
        // property value.
        let trait_method = self
            .ctx
            .classes
            .class_of(&obj, self.heap)
            .and_then(|c| self.ctx.classes.find_trait(c, &mn.local))
            .and_then(|t| match t.kind {
                TraitKind::Method(m) => Some(m),
                TraitKind::Slot { .. } => None,
            });

        let result = match trait_method {
            Some(m) => self.call_method(m, obj, args, Vec::new()),
            None => {
                let callee = match self.get_property_value(&obj, &mn) {
                    Ok(v) => v,
                    Err(e) => {
                        obj.drop_with_heap(self.heap);
                        mn.reset_name_if_object(self.heap);
                        self.drop_values(args);
                        return Err(e);
                    }
                };
                if callee.is_undefined() || callee.is_null() {
                    let err = VmError::not_a_function(&mn.local);
                    callee.drop_with_heap(self.heap);
                    obj.drop_with_heap(self.heap);
                    mn.reset_name_if_object(self.heap);
                    self.drop_values(args);
                    return Err(err);
                }
                self.call_value(callee, obj, args)
            }
        };
        mn.reset_name_if_object(self.heap);
        let ret = result?;
        if keep_return {
            self.push_result(context, ret)
        } else {
            self.discard_result(ret);
            Ok(())
        }
    }

    /// `callsuper`/`callsupervoid`: dispatches through the superclass
    /// traits of the receiver's class.
    pub(super) fn op_call_super(
        &mut self,
        context: &mut CallContext,
        index: u32,
        argc: u32,
        keep_return: bool,
    ) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = match context.pop() {
            Ok(o) => o,
            Err(e) => {
                mn.reset_name_if_object(self.heap);
                self.drop_values(args);
                return Err(e);
            }
        };
        let target = self.super_trait_of(&obj, &mn.local);
        mn.reset_name_if_object(self.heap);
        let ret = match target {
            Ok(TraitKind::Method(m)) => self.call_method(m, obj, args, Vec::new())?,
            Ok(TraitKind::Slot { .. }) => {
                let err = VmError::not_a_function("super slot");
                obj.drop_with_heap(self.heap);
                self.drop_values(args);
                return Err(err);
            }
            Err(e) => {
                obj.drop_with_heap(self.heap);
                self.drop_values(args);
                return Err(e);
            }
        };
        if keep_return {
            self.push_result(context, ret)
        } else {
            self.discard_result(ret);
            Ok(())
        }
    }

    /// `construct(argc)`: stack is [type, args...].
    pub(super) fn op_construct(&mut self, context: &mut CallContext, argc: u32) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let type_v = context.pop()?;
        let instance = self.construct_value(type_v, args)?;
        self.push_value(context, instance)
    }

    /// `constructprop(name, argc)`: the type is read off the receiver.
    pub(super) fn op_construct_prop(&mut self, context: &mut CallContext, index: u32, argc: u32) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = match context.pop() {
            Ok(o) => o,
            Err(e) => {
                mn.reset_name_if_object(self.heap);
                self.drop_values(args);
                return Err(e);
            }
        };
        let type_v = self.get_property_value(&obj, &mn);
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        let type_v = match type_v {
            Ok(v) => v,
            Err(e) => {
                self.drop_values(args);
                return Err(e);
            }
        };
        let instance = self.construct_value(type_v, args)?;
        self.push_value(context, instance)
    }

    /// `constructsuper(argc)`: runs the superclass constructor on `this`.
    pub(super) fn op_construct_super(&mut self, context: &mut CallContext, argc: u32) -> RunResult<()> {
        let args = self.pop_args(context, argc)?;
        let obj = context.pop()?;
        let super_ctor = self
            .ctx
            .classes
            .class_of(&obj, self.heap)
            .and_then(|c| self.ctx.classes.get(c).super_id)
            .and_then(|s| self.ctx.classes.get(s).constructor);
        match super_ctor {
            Some(m) => {
                let ret = self.call_method(m, obj, args, Vec::new())?;
                self.discard_result(ret);
            }
            None => {
                obj.drop_with_heap(self.heap);
                self.drop_values(args);
            }
        }
        Ok(())
    }

    /// Instantiates a type value. Consumes `type_v` and `args`.
    fn construct_value(&mut self, type_v: Value, args: Vec<Value>) -> RunResult<Value> {
        match &type_v {
            Value::Class(cid) => {
                let cid = *cid;
                self.construct_class(cid, args)
            }
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Function(_)) => {
                // Constructing through a function: a fresh dynamic object
                // becomes `this`; the return value is discarded.
                let instance = self
                    .heap
                    .allocate(HeapData::Object(ScriptObject::dynamic_object()));
                self.heap.inc_ref(instance);
                match self.call_value(type_v, Value::Ref(instance), args) {
                    Ok(ret) => self.discard_result(ret),
                    Err(e) => {
                        self.heap.dec_ref(instance);
                        return Err(e);
                    }
                }
                Ok(Value::Ref(instance))
            }
            _ => {
                let desc = type_v.to_debug_string(self.heap, &self.ctx.pool);
                type_v.drop_with_heap(self.heap);
                self.drop_values(args);
                Err(VmError::type_error(
                    K_CONSTRUCT_OF_NON_FUNCTION,
                    format!("Instantiation attempted on a non-constructor: {desc}"),
                ))
            }
        }
    }

    fn construct_class(&mut self, cid: ClassId, args: Vec<Value>) -> RunResult<Value> {
        let def = self.ctx.classes.get(cid);
        match def.kind {
            ClassKind::Object => {
                self.drop_values(args);
                Ok(Value::Ref(
                    self.heap.allocate(HeapData::Object(ScriptObject::dynamic_object())),
                ))
            }
            ClassKind::Array => {
                let id = self.heap.allocate(HeapData::Array(ArrayData::with_values(args)));
                Ok(Value::Ref(id))
            }
            ClassKind::Int | ClassKind::UInt | ClassKind::Number | ClassKind::Boolean | ClassKind::String => {
                // new int(x) behaves like the conversion call.
                let arg = match args.len() {
                    0 => Value::Undefined,
                    _ => {
                        let mut iter = args.into_iter();
                        let first = iter.next().expect("at least one argument");
                        for extra in iter {
                            extra.drop_with_heap(self.heap);
                        }
                        first
                    }
                };
                self.ctx.classes.coerce(TypeRef::Class(cid), arg, self.heap, &self.ctx.pool)
            }
            ClassKind::Custom => {
                let slot_count = self.ctx.classes.instance_slot_count(cid);
                let ctor = self.ctx.classes.get(cid).constructor;
                let instance = self
                    .heap
                    .allocate(HeapData::Object(ScriptObject::with_slots(Some(cid), slot_count, true)));
                match ctor {
                    Some(m) => {
                        self.heap.inc_ref(instance);
                        match self.call_method(m, Value::Ref(instance), args, Vec::new()) {
                            Ok(ret) => self.discard_result(ret),
                            Err(e) => {
                                self.heap.dec_ref(instance);
                                return Err(e);
                            }
                        }
                    }
                    None => self.drop_values(args),
                }
                Ok(Value::Ref(instance))
            }
            _ => {
                self.drop_values(args);
                Err(VmError::type_error(
                    K_CONSTRUCT_OF_NON_FUNCTION,
                    format!("class {} cannot be instantiated directly", self.ctx.classes.get(cid).name),
                ))
            }
        }
    }

    /// `constructgenerictype(n)`: applies n popped type parameters to the
    /// popped template class.
    pub(super) fn op_construct_generic_type(&mut self, context: &mut CallContext, count: u32) -> RunResult<()> {
        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let p = context.pop()?;
            let type_ref = match &p {
                Value::Class(cid) => TypeRef::Class(*cid),
                Value::Null => TypeRef::Any,
                _ => {
                    p.drop_with_heap(self.heap);
                    return Err(VmError::type_error(
                        K_TYPE_APP_OF_NON_PARAM,
                        "type parameter is not a class",
                    ));
                }
            };
            p.drop_with_heap(self.heap);
            params.push(type_ref);
        }
        params.reverse();

        let template = context.pop()?;
        let tid = match template {
            Value::Class(tid) => tid,
            other => {
                let desc = other.to_debug_string(self.heap, &self.ctx.pool);
                other.drop_with_heap(self.heap);
                return Err(VmError::type_error(
                    K_TYPE_APP_OF_NON_PARAM,
                    format!("type application on a non-parameterized type: {desc}"),
                ));
            }
        };
        if self.ctx.classes.get(tid).kind != ClassKind::Template {
            return Err(VmError::type_error(
                K_TYPE_APP_OF_NON_PARAM,
                format!("class {} is not parameterized", self.ctx.classes.get(tid).name),
            ));
        }
        let applied = self.ctx.classes.apply_template(tid, &params);
        self.push_value(context, Value::Class(applied))
    }
}
