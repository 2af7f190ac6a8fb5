//! Multiname resolution, property access, scope-chain lookup, iteration,
//! object construction, and the type-test opcodes.

use super::Interpreter;
use crate::{
    class::{ClassId, TraitKind, TypeRef},
    coerce,
    context::CallContext,
    error::{
        RunResult, VmError, K_ASSIGN_TO_METHOD, K_CANNOT_CREATE_PROPERTY, K_CLASS_NOT_FOUND, K_DESCENDENTS,
        K_GET_SCOPE_OBJECT_BOUNDS, K_INSTANCEOF_NON_OBJECT, K_WRITE_TO_READ_ONLY,
    },
    heap::{HeapData, HeapId},
    method::MethodId,
    multiname::Multiname,
    object::{ArrayData, FunctionObject, Namespace, ScriptObject},
    value::Value,
};

impl Interpreter<'_> {
    // === Multiname resolution =============================================

    /// Resolves the multiname at `index`, popping runtime components from
    /// the operand stack. Consumed namespace values are released here; the
    /// runtime name stays owned by the returned multiname until
    /// `reset_name_if_object`.
    pub(super) fn resolve_multiname(&mut self, context: &mut CallContext, index: u32) -> RunResult<Multiname> {
        let heap = &*self.heap;
        let (mn, consumed) = Multiname::resolve(index, &self.ctx.pool, heap, &self.ctx.classes, || context.pop())?;
        for v in consumed {
            v.drop_with_heap(self.heap);
        }
        Ok(mn)
    }

    /// Resolves a multiname that must not have runtime components
    /// (`coerce`, `astype`, `istype`, `getlexonce`).
    pub(super) fn resolve_multiname_fixed(&mut self, index: u32) -> RunResult<Multiname> {
        let (mn, consumed) = Multiname::resolve(index, &self.ctx.pool, self.heap, &self.ctx.classes, || {
            Err(VmError::verify_error(
                crate::error::K_ILLEGAL_DEFAULT_VALUE,
                "multiname with runtime components where a compile-time name is required",
            ))
        })?;
        debug_assert!(consumed.is_empty());
        Ok(mn)
    }

    /// Resolves a compile-time multiname to a type reference.
    pub(super) fn resolve_fixed_type(&mut self, index: u32) -> RunResult<TypeRef> {
        let mut mn = self.resolve_multiname_fixed(index)?;
        let type_ref = if mn.any {
            Some(TypeRef::Any)
        } else {
            self.ctx.classes.resolve_type(&mn.local)
        };
        let result = type_ref.ok_or_else(|| {
            VmError::reference_error(K_CLASS_NOT_FOUND, format!("Class {} could not be found", mn.local))
        });
        mn.reset_name_if_object(self.heap);
        result
    }

    // === Property lookup helpers ==========================================

    /// Declared-traits lookup only; used for lexical scope entries.
    fn has_trait(&self, value: &Value, name: &str) -> bool {
        self.ctx
            .classes
            .class_of(value, self.heap)
            .and_then(|c| self.ctx.classes.find_trait(c, name))
            .is_some()
    }

    /// Full dynamic lookup: traits, dynamic properties, array contents, and
    /// the prototype chain. Used for with-scopes, `in`, and `findproperty`'s
    /// global fallback.
    pub(super) fn has_property_deep(&self, value: &Value, name: &str) -> bool {
        if self.has_trait(value, name) {
            return true;
        }
        match value {
            Value::Ref(id) => self.heap_has_property(*id, name),
            _ => false,
        }
    }

    fn heap_has_property(&self, id: HeapId, name: &str) -> bool {
        match self.heap.get(id) {
            HeapData::Array(a) => {
                if name == "length" {
                    return true;
                }
                name.parse::<usize>().is_ok_and(|i| i < a.len())
            }
            HeapData::Object(o) => {
                if o.has_dynamic(name) {
                    return true;
                }
                o.prototype.is_some_and(|p| self.heap_has_property(p, name))
            }
            _ => false,
        }
    }

    /// Walks the effective scope chain from top to bottom, returning an
    /// owned duplicate of the first entry that binds `name`. With-scopes use
    /// dynamic lookup; lexical scopes consult fixed traits only.
    fn find_in_scopes(&mut self, context: &CallContext, name: &str) -> Option<Value> {
        let mut found = None;
        for entry in context.scopes_innermost_first() {
            let matches = if entry.is_with {
                self.has_property_deep(&entry.value, name)
            } else {
                self.has_trait(&entry.value, name)
            };
            if matches {
                found = Some(entry.value.copy_tag());
                break;
            }
        }
        found.map(|v| v.clone_with_heap(self.heap))
    }

    /// `findpropstrict`/`findproperty`: scope chain, then the application
    /// domain globals. Strict lookup raises a ReferenceError when nothing
    /// binds; lax lookup answers the global object.
    pub(super) fn op_find_property(&mut self, context: &mut CallContext, index: u32, strict: bool) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        let result = self.find_property_target(context, &mn, strict);
        mn.reset_name_if_object(self.heap);
        let target = result?;
        self.push_value(context, target)
    }

    fn find_property_target(&mut self, context: &CallContext, mn: &Multiname, strict: bool) -> RunResult<Value> {
        if let Some(v) = self.find_in_scopes(context, &mn.local) {
            return Ok(v);
        }
        if self.ctx.domain.has_global(self.heap, &mn.local) {
            let global = self.ctx.domain.global();
            self.heap.inc_ref(global);
            return Ok(Value::Ref(global));
        }
        if strict {
            Err(VmError::undefined_var(&mn.local))
        } else {
            let global = self.ctx.domain.global();
            self.heap.inc_ref(global);
            Ok(Value::Ref(global))
        }
    }

    /// `finddef` is intentionally unimplemented: log and push Null.
    pub(super) fn op_find_def(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        log::warn!("opcode 0x5f (finddef) not implemented: {mn}");
        mn.reset_name_if_object(self.heap);
        self.push_value(context, Value::Null)
    }

    /// `getlex` is `findpropstrict` followed by `getproperty` on the target.
    pub(super) fn op_get_lex(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        let target = match self.find_property_target(context, &mn, true) {
            Ok(t) => t,
            Err(e) => {
                mn.reset_name_if_object(self.heap);
                return Err(e);
            }
        };
        let result = self.get_property_value(&target, &mn);
        target.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        self.push_value(context, result?)
    }

    /// Reads a property, returning an owned duplicate. Unknown names read as
    /// Undefined.
    pub(super) fn get_property_value(&mut self, obj: &Value, mn: &Multiname) -> RunResult<Value> {
        if obj.is_null() {
            return Err(VmError::convert_null_to_object());
        }
        if obj.is_undefined() {
            return Err(VmError::convert_undefined_to_object());
        }
        let name = mn.local.as_str();

        // Declared traits first.
        if let Some(class) = self.ctx.classes.class_of(obj, self.heap) {
            if let Some(t) = self.ctx.classes.find_trait(class, name) {
                match t.kind {
                    TraitKind::Slot { .. } => {
                        let slot_id = t.slot_id;
                        if let Value::Ref(id) = obj {
                            if let HeapData::Object(o) = self.heap.get(*id) {
                                if let Some(v) = o.slot(slot_id) {
                                    let v = v.copy_tag();
                                    return Ok(v.clone_with_heap(self.heap));
                                }
                            }
                        }
                    }
                    TraitKind::Method(m) => {
                        let func = FunctionObject {
                            method: m,
                            captured_scope: Vec::new(),
                        };
                        return Ok(Value::Ref(self.heap.allocate(HeapData::Function(func))));
                    }
                }
            }
        }

        if let Value::Ref(id) = obj {
            if let Some(v) = self.heap_get_property(*id, name)? {
                return Ok(v);
            }
        }

        // String length is the only primitive property surfaced here.
        if let Some(s) = coerce::string_value(obj, self.heap, &self.ctx.pool) {
            if name == "length" {
                return Ok(Value::abstract_i(s.chars().count() as i32));
            }
        }

        log::trace!("getProperty {name} not found, pushing Undefined");
        Ok(Value::Undefined)
    }

    fn heap_get_property(&mut self, id: HeapId, name: &str) -> RunResult<Option<Value>> {
        let found = match self.heap.get(id) {
            HeapData::Array(a) => {
                if name == "length" {
                    Some(Value::abstract_i(a.len() as i32))
                } else if let Ok(i) = name.parse::<usize>() {
                    a.get(i).map(Value::copy_tag)
                } else {
                    None
                }
            }
            HeapData::Object(o) => match o.get_dynamic(name) {
                Some(v) => Some(v.copy_tag()),
                None => {
                    if let Some(proto) = o.prototype {
                        return self.heap_get_property(proto, name);
                    }
                    None
                }
            },
            HeapData::Namespace(ns) => match name {
                "uri" => {
                    let uri = ns.uri.clone();
                    return Ok(Some(Value::abstract_s(self.heap, uri)));
                }
                "prefix" => {
                    let prefix = ns.prefix.clone();
                    return Ok(Some(match prefix {
                        Some(p) => Value::abstract_s(self.heap, p),
                        None => Value::Undefined,
                    }));
                }
                _ => None,
            },
            HeapData::QName(q) => match name {
                "localName" => {
                    let local = q.local.clone();
                    return Ok(Some(Value::abstract_s(self.heap, local)));
                }
                "uri" => {
                    let uri = q.uri.clone();
                    return Ok(Some(match uri {
                        Some(u) => Value::abstract_s(self.heap, u),
                        None => Value::Null,
                    }));
                }
                _ => None,
            },
            _ => None,
        };
        Ok(found.map(|v| v.clone_with_heap(self.heap)))
    }

    pub(super) fn op_get_property(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = context.pop()?;
        let ret = self.get_property_value(&obj, &mn);
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        self.push_value(context, ret?)
    }

    /// Writes a property, consuming one reference of `value`. `init` writes
    /// are allowed into const slots.
    pub(super) fn set_property_value(&mut self, obj: &Value, mn: &Multiname, value: Value, init: bool) -> RunResult<()> {
        if obj.is_null() {
            value.drop_with_heap(self.heap);
            return Err(VmError::convert_null_to_object());
        }
        if obj.is_undefined() {
            value.drop_with_heap(self.heap);
            return Err(VmError::convert_undefined_to_object());
        }
        let name = mn.local.as_str();

        if let Some(class) = self.ctx.classes.class_of(obj, self.heap) {
            if let Some(t) = self.ctx.classes.find_trait(class, name) {
                match t.kind {
                    TraitKind::Slot { type_ref, is_const } => {
                        if is_const && !init {
                            value.drop_with_heap(self.heap);
                            return Err(VmError::reference_error(
                                K_WRITE_TO_READ_ONLY,
                                format!("Illegal write to read-only property {name}"),
                            ));
                        }
                        let slot_id = t.slot_id;
                        let coerced = self.ctx.classes.coerce(type_ref, value, self.heap, &self.ctx.pool)?;
                        return self.store_slot_raw(obj, slot_id, coerced);
                    }
                    TraitKind::Method(_) => {
                        value.drop_with_heap(self.heap);
                        return Err(VmError::reference_error(
                            K_ASSIGN_TO_METHOD,
                            format!("Cannot assign to a method {name}"),
                        ));
                    }
                }
            }
        }

        let Value::Ref(id) = obj else {
            // Primitive receivers silently drop dynamic writes.
            value.drop_with_heap(self.heap);
            return Ok(());
        };
        let id = *id;

        // Classify the receiver first so the mutable heap borrow below does
        // not overlap the conversions.
        enum Receiver {
            ArrayIndex(usize),
            ArrayLength,
            ArrayOther,
            Object { sealed_miss: bool },
            Other,
        }
        let receiver = match self.heap.get(id) {
            HeapData::Array(_) => {
                if let Ok(i) = name.parse::<usize>() {
                    Receiver::ArrayIndex(i)
                } else if name == "length" {
                    Receiver::ArrayLength
                } else {
                    Receiver::ArrayOther
                }
            }
            HeapData::Object(o) => Receiver::Object {
                sealed_miss: o.sealed && !o.has_dynamic(name),
            },
            _ => Receiver::Other,
        };

        match receiver {
            Receiver::ArrayIndex(i) => {
                let mut freed = Vec::new();
                if let HeapData::Array(a) = self.heap.get_mut(id) {
                    a.set(i, value, &mut freed);
                }
                for f in freed {
                    self.heap.dec_ref(f);
                }
                Ok(())
            }
            Receiver::ArrayLength => {
                let new_len = coerce::to_uint32(&value, self.heap, &self.ctx.pool) as usize;
                value.drop_with_heap(self.heap);
                self.resize_array(id, new_len);
                Ok(())
            }
            Receiver::ArrayOther | Receiver::Other => {
                value.drop_with_heap(self.heap);
                Ok(())
            }
            Receiver::Object { sealed_miss: true } => {
                value.drop_with_heap(self.heap);
                Err(VmError::reference_error(
                    K_CANNOT_CREATE_PROPERTY,
                    format!("Cannot create property {name}"),
                ))
            }
            Receiver::Object { sealed_miss: false } => {
                let old = match self.heap.get_mut(id) {
                    HeapData::Object(o) => o.set_dynamic(name, value),
                    _ => unreachable!("receiver classified as object"),
                };
                if let Some(old) = old {
                    old.drop_with_heap(self.heap);
                }
                Ok(())
            }
        }
    }

    fn resize_array(&mut self, id: HeapId, new_len: usize) {
        let mut freed = Vec::new();
        if let HeapData::Array(a) = self.heap.get_mut(id) {
            while a.len() > new_len {
                if let Some(Value::Ref(rid)) = a.pop_value() {
                    freed.push(rid);
                }
            }
            if new_len > 0 && a.len() < new_len {
                a.set(new_len - 1, Value::Undefined, &mut freed);
            }
        }
        for f in freed {
            self.heap.dec_ref(f);
        }
    }

    fn store_slot_raw(&mut self, obj: &Value, slot_id: u32, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            value.drop_with_heap(self.heap);
            return Ok(());
        };
        let id = *id;
        if let HeapData::Object(o) = self.heap.get_mut(id) {
            match o.replace_slot(slot_id, value) {
                Some(old) => {
                    old.drop_with_heap(self.heap);
                    Ok(())
                }
                None => Err(VmError::verify_error(
                    crate::error::K_ILLEGAL_DEFAULT_VALUE,
                    format!("slot {slot_id} out of range"),
                )),
            }
        } else {
            value.drop_with_heap(self.heap);
            Ok(())
        }
    }

    pub(super) fn op_set_property(&mut self, context: &mut CallContext, index: u32, init: bool) -> RunResult<()> {
        let value = context.pop()?;
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = context.pop()?;
        let result = self.set_property_value(&obj, &mn, value, init);
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        result
    }

    /// `deleteproperty`: only dynamic properties can be removed; deleting a
    /// declared trait answers false, a missing name answers true.
    pub(super) fn op_delete_property(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = context.pop()?;
        let result = if obj.is_null() {
            Err(VmError::convert_null_to_object())
        } else if obj.is_undefined() {
            Err(VmError::convert_undefined_to_object())
        } else {
            let name = mn.local.as_str();
            if self.has_trait(&obj, name) {
                Ok(false)
            } else if let Value::Ref(id) = &obj {
                let removed = match self.heap.get_mut(*id) {
                    HeapData::Object(o) => o.delete_dynamic(name),
                    _ => None,
                };
                if let Some(v) = removed {
                    v.drop_with_heap(self.heap);
                }
                Ok(true)
            } else {
                Ok(true)
            }
        };
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        self.push_value(context, Value::abstract_b(result?))
    }

    // === Slots ============================================================

    pub(super) fn op_get_slot(&mut self, context: &mut CallContext, slot_id: u32) -> RunResult<()> {
        let obj = context.pop()?;
        let ret = self.read_slot(&obj, slot_id);
        obj.drop_with_heap(self.heap);
        self.push_value(context, ret?)
    }

    fn read_slot(&mut self, obj: &Value, slot_id: u32) -> RunResult<Value> {
        if obj.is_null() {
            return Err(VmError::convert_null_to_object());
        }
        if obj.is_undefined() {
            return Err(VmError::convert_undefined_to_object());
        }
        if let Value::Ref(id) = obj {
            if let HeapData::Object(o) = self.heap.get(*id) {
                if let Some(v) = o.slot(slot_id) {
                    let v = v.copy_tag();
                    return Ok(v.clone_with_heap(self.heap));
                }
            }
        }
        Err(VmError::verify_error(
            crate::error::K_ILLEGAL_DEFAULT_VALUE,
            format!("slot {slot_id} out of range"),
        ))
    }

    /// `setslot`/`setslot_no_coerce`: the coercing form runs the declared
    /// slot type's conversion when the receiver's class declares one.
    pub(super) fn op_set_slot(&mut self, context: &mut CallContext, slot_id: u32, coerce_slot: bool) -> RunResult<()> {
        let value = context.pop()?;
        let obj = context.pop()?;
        let result = self.write_slot(&obj, slot_id, value, coerce_slot);
        obj.drop_with_heap(self.heap);
        result
    }

    fn write_slot(&mut self, obj: &Value, slot_id: u32, value: Value, coerce_slot: bool) -> RunResult<()> {
        if obj.is_null() {
            value.drop_with_heap(self.heap);
            return Err(VmError::convert_null_to_object());
        }
        if obj.is_undefined() {
            value.drop_with_heap(self.heap);
            return Err(VmError::convert_undefined_to_object());
        }
        let value = if coerce_slot {
            match self.slot_type(obj, slot_id) {
                Some(type_ref) => self.ctx.classes.coerce(type_ref, value, self.heap, &self.ctx.pool)?,
                None => value,
            }
        } else {
            value
        };
        self.store_slot_raw(obj, slot_id, value)
    }

    fn slot_type(&self, obj: &Value, slot_id: u32) -> Option<TypeRef> {
        let class = match obj {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Object(o) => o.class?,
                _ => return None,
            },
            _ => return None,
        };
        let mut cur = Some(class);
        while let Some(cid) = cur {
            for t in &self.ctx.classes.get(cid).instance_traits {
                if let TraitKind::Slot { type_ref, .. } = t.kind {
                    if t.slot_id == slot_id {
                        return Some(type_ref);
                    }
                }
            }
            cur = self.ctx.classes.get(cid).super_id;
        }
        None
    }

    pub(super) fn op_get_global_slot(&mut self, context: &mut CallContext, slot_id: u32) -> RunResult<()> {
        let global = self.global_scope_value(context);
        let ret = self.read_slot(&global, slot_id);
        global.drop_with_heap(self.heap);
        self.push_value(context, ret?)
    }

    pub(super) fn op_set_global_slot(&mut self, context: &mut CallContext, slot_id: u32) -> RunResult<()> {
        let global = self.global_scope_value(context);
        let value = context.pop()?;
        let result = self.write_slot(&global, slot_id, value, true);
        global.drop_with_heap(self.heap);
        result
    }

    // === Scope opcodes ====================================================

    fn global_scope_value(&mut self, context: &CallContext) -> Value {
        match context.global_scope() {
            Some(entry) => {
                let v = entry.value.copy_tag();
                v.clone_with_heap(self.heap)
            }
            None => {
                let global = self.ctx.domain.global();
                self.heap.inc_ref(global);
                Value::Ref(global)
            }
        }
    }

    pub(super) fn op_get_global_scope(&mut self, context: &mut CallContext) -> RunResult<()> {
        let v = self.global_scope_value(context);
        self.push_value(context, v)
    }

    pub(super) fn op_get_scope_object(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let entry = context.scope_at(index as usize).ok_or_else(|| {
            VmError::verify_error(K_GET_SCOPE_OBJECT_BOUNDS, format!("scope index {index} out of bounds"))
        })?;
        let v = entry.value.copy_tag();
        let v = v.clone_with_heap(self.heap);
        self.push_value(context, v)
    }

    /// Like `getscopeobject`, but indexes the effective chain: the captured
    /// parent region first, then the current region.
    pub(super) fn op_get_scope_at_index(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        log::trace!("getScopeAtIndex {index}");
        let entry = context.scope_at_effective(index as usize).ok_or_else(|| {
            VmError::verify_error(K_GET_SCOPE_OBJECT_BOUNDS, format!("scope index {index} out of bounds"))
        })?;
        let v = entry.value.copy_tag();
        let v = v.clone_with_heap(self.heap);
        self.push_value(context, v)
    }

    // === Iteration ========================================================

    /// Number of enumerable positions on a value.
    fn enumeration_len(&self, value: &Value) -> usize {
        match value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Array(a) => a.len(),
                HeapData::Object(o) => o.dynamic_len(),
                _ => 0,
            },
            _ => 0,
        }
    }

    /// `hasnext2`: advances the index local; exhaustion nulls out the object
    /// local and resets the index to zero.
    pub(super) fn op_has_next2(&mut self, context: &mut CallContext, obj_local: usize, index_local: usize) -> RunResult<()> {
        self.check_local(context, obj_local)?;
        self.check_local(context, index_local)?;
        let cur = coerce::to_uint32(
            context.local(index_local).expect("checked local"),
            self.heap,
            &self.ctx.pool,
        ) as usize;
        let len = self.enumeration_len(context.local(obj_local).expect("checked local"));

        let has_next = cur < len;
        if has_next {
            context.set_local(index_local, Value::abstract_i((cur + 1) as i32), self.heap);
        } else {
            context.set_local(obj_local, Value::Null, self.heap);
            context.set_local(index_local, Value::abstract_i(0), self.heap);
        }
        self.push_value(context, Value::abstract_b(has_next))
    }

    /// `nextname`/`nextvalue`: the 1-based enumeration position and the
    /// object are popped; the name (or value) at that position is pushed.
    pub(super) fn op_next(&mut self, context: &mut CallContext, want_name: bool) -> RunResult<()> {
        let index_v = context.pop()?;
        let obj = context.pop()?;
        let pos = coerce::to_uint32(&index_v, self.heap, &self.ctx.pool) as usize;

        let ret = match &obj {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Array(a) => {
                    if pos == 0 || pos > a.len() {
                        Value::Undefined
                    } else if want_name {
                        Value::abstract_ui((pos - 1) as u32)
                    } else {
                        let v = a.values()[pos - 1].copy_tag();
                        v.clone_with_heap(self.heap)
                    }
                }
                HeapData::Object(o) => match o.dynamic_at(pos) {
                    Some((name, value)) => {
                        if want_name {
                            let name = name.to_owned();
                            Value::abstract_s(self.heap, name)
                        } else {
                            let v = value.copy_tag();
                            v.clone_with_heap(self.heap)
                        }
                    }
                    None => Value::Undefined,
                },
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        };

        index_v.drop_with_heap(self.heap);
        obj.drop_with_heap(self.heap);
        self.push_value(context, ret)
    }

    // === Construction =====================================================

    /// `newobject(n)`: n name/value pairs are popped value-first.
    pub(super) fn op_new_object(&mut self, context: &mut CallContext, pairs: u32) -> RunResult<()> {
        let mut obj = ScriptObject::dynamic_object();
        let mut freed = Vec::new();
        for _ in 0..pairs {
            let value = context.pop()?;
            let name_v = context.pop()?;
            let name = coerce::to_avm_string(&name_v, self.heap, &self.ctx.pool, &self.ctx.classes);
            name_v.drop_with_heap(self.heap);
            if let Some(old) = obj.set_dynamic(&name, value) {
                if let Value::Ref(id) = old {
                    freed.push(id);
                }
            }
        }
        for f in freed {
            self.heap.dec_ref(f);
        }
        let id = self.heap.allocate(HeapData::Object(obj));
        self.push_value(context, Value::Ref(id))
    }

    /// `newarray(n)`: n elements popped back into source order.
    pub(super) fn op_new_array(&mut self, context: &mut CallContext, count: u32) -> RunResult<()> {
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(context.pop()?);
        }
        values.reverse();
        let id = self.heap.allocate(HeapData::Array(ArrayData::with_values(values)));
        self.push_value(context, Value::Ref(id))
    }

    pub(super) fn op_new_activation(&mut self, context: &mut CallContext, method: MethodId) -> RunResult<()> {
        let slots = self.ctx.methods[method.index()].activation_slots;
        let obj = ScriptObject::with_slots(None, slots, false);
        let id = self.heap.allocate(HeapData::Object(obj));
        self.push_value(context, Value::Ref(id))
    }

    /// `newclass`: pops the base class and pushes the class at `index`.
    pub(super) fn op_new_class(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let base = context.pop()?;
        base.drop_with_heap(self.heap);
        if (index as usize) >= self.ctx.classes.len() {
            return Err(VmError::parse_exception(format!("class index {index} out of range")));
        }
        self.push_value(context, Value::Class(ClassId(index)))
    }

    /// `newcatch`: a one-slot scope object for the handler's catch variable.
    pub(super) fn op_new_catch(&mut self, context: &mut CallContext, _handler: u32) -> RunResult<()> {
        let obj = ScriptObject::with_slots(None, 1, false);
        let id = self.heap.allocate(HeapData::Object(obj));
        self.push_value(context, Value::Ref(id))
    }

    /// `newfunction`: captures the current effective scope chain.
    pub(super) fn op_new_function(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        if (index as usize) >= self.ctx.methods.len() {
            return Err(VmError::parse_exception(format!("method index {index} out of range")));
        }
        let captured_scope = context.capture_scope(self.heap);
        let func = FunctionObject {
            method: MethodId(index),
            captured_scope,
        };
        let id = self.heap.allocate(HeapData::Function(func));
        self.push_value(context, Value::Ref(id))
    }

    // === Type tests and XML leftovers =====================================

    /// `astype`: keep the value when it is of the named type, else Null.
    pub(super) fn op_as_type(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let type_ref = self.resolve_fixed_type(index)?;
        let v = context.pop()?;
        if self.ctx.classes.is_type(type_ref, &v, self.heap) {
            self.push_value(context, v)
        } else {
            v.drop_with_heap(self.heap);
            self.push_value(context, Value::Null)
        }
    }

    pub(super) fn op_is_type(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let type_ref = self.resolve_fixed_type(index)?;
        let v = context.pop()?;
        let ret = self.ctx.classes.is_type(type_ref, &v, self.heap);
        v.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_b(ret))
    }

    /// `astypelate`/`istypelate`: the type is popped from the stack.
    pub(super) fn op_as_type_late(&mut self, context: &mut CallContext, keep_value: bool) -> RunResult<()> {
        let type_v = context.pop()?;
        let value = context.pop()?;
        let cid = match type_v {
            Value::Class(cid) => cid,
            other => {
                other.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                return Err(VmError::check_type_failed("value", "a class"));
            }
        };
        let is = self.ctx.classes.is_type(TypeRef::Class(cid), &value, self.heap);
        if keep_value {
            if is {
                self.push_value(context, value)
            } else {
                value.drop_with_heap(self.heap);
                self.push_value(context, Value::Null)
            }
        } else {
            value.drop_with_heap(self.heap);
            self.push_value(context, Value::abstract_b(is))
        }
    }

    /// `instanceof`: class-chain membership; function prototypes are not
    /// modeled, so function types never match.
    pub(super) fn op_instance_of(&mut self, context: &mut CallContext) -> RunResult<()> {
        let type_v = context.pop()?;
        let value = context.pop()?;
        let ret = match &type_v {
            Value::Class(cid) => self
                .ctx
                .classes
                .class_of(&value, self.heap)
                .is_some_and(|vc| self.ctx.classes.is_subclass(vc, *cid)),
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Function(_)) => false,
            _ => {
                type_v.drop_with_heap(self.heap);
                value.drop_with_heap(self.heap);
                return Err(VmError::type_error(
                    K_INSTANCEOF_NON_OBJECT,
                    "The right-hand side of instanceof must be a class or function",
                ));
            }
        };
        type_v.drop_with_heap(self.heap);
        value.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_b(ret))
    }

    /// `in`: dynamic membership test on the popped object.
    pub(super) fn op_in(&mut self, context: &mut CallContext) -> RunResult<()> {
        let obj = context.pop()?;
        let name_v = context.pop()?;
        if obj.is_null() {
            obj.drop_with_heap(self.heap);
            name_v.drop_with_heap(self.heap);
            return Err(VmError::convert_null_to_object());
        }
        if obj.is_undefined() {
            obj.drop_with_heap(self.heap);
            name_v.drop_with_heap(self.heap);
            return Err(VmError::convert_undefined_to_object());
        }
        let name = coerce::to_avm_string(&name_v, self.heap, &self.ctx.pool, &self.ctx.classes);
        let ret = self.has_property_deep(&obj, &name);
        obj.drop_with_heap(self.heap);
        name_v.drop_with_heap(self.heap);
        self.push_value(context, Value::abstract_b(ret))
    }

    /// `getdescendants`: XML is outside this crate's value model, so every
    /// reachable operand raises the descendants TypeError.
    pub(super) fn op_get_descendants(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        mn.reset_name_if_object(self.heap);
        let obj = context.pop()?;
        obj.drop_with_heap(self.heap);
        Err(VmError::type_error(
            K_DESCENDENTS,
            "Descendants operator (..) not supported on this type",
        ))
    }

    // === Super access =====================================================

    pub(super) fn op_get_super(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = context.pop()?;
        let result = self.super_trait_of(&obj, &mn.local).and_then(|t| match t {
            TraitKind::Slot { .. } => self.get_property_value(&obj, &mn),
            TraitKind::Method(m) => {
                let func = FunctionObject {
                    method: m,
                    captured_scope: Vec::new(),
                };
                Ok(Value::Ref(self.heap.allocate(HeapData::Function(func))))
            }
        });
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        self.push_value(context, result?)
    }

    pub(super) fn op_set_super(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let value = context.pop()?;
        let mut mn = self.resolve_multiname(context, index)?;
        let obj = context.pop()?;
        let result = match self.super_trait_of(&obj, &mn.local) {
            Ok(TraitKind::Slot { .. }) => self.set_property_value(&obj, &mn, value, false),
            Ok(TraitKind::Method(_)) => {
                value.drop_with_heap(self.heap);
                Err(VmError::reference_error(
                    K_ASSIGN_TO_METHOD,
                    format!("Cannot assign to a method {}", mn.local),
                ))
            }
            Err(e) => {
                value.drop_with_heap(self.heap);
                Err(e)
            }
        };
        obj.drop_with_heap(self.heap);
        mn.reset_name_if_object(self.heap);
        result
    }

    pub(super) fn super_trait_of(&self, obj: &Value, name: &str) -> RunResult<TraitKind> {
        let class = self
            .ctx
            .classes
            .class_of(obj, self.heap)
            .ok_or_else(VmError::convert_null_to_object)?;
        self.ctx
            .classes
            .find_super_trait(class, name)
            .map(|t| t.kind)
            .ok_or_else(|| {
                VmError::reference_error(
                    crate::error::K_SUPER_NOT_FOUND,
                    format!("Method {name} not found on the superclass"),
                )
            })
    }

    // === Conversions ======================================================

    pub(super) fn op_push_namespace(&mut self, context: &mut CallContext, index: u32) -> RunResult<()> {
        let info = self
            .ctx
            .pool
            .namespace(index)
            .ok_or_else(|| VmError::parse_exception(format!("namespace index {index} out of range")))?;
        let ns = Namespace {
            kind: info.kind,
            prefix: None,
            uri: self.ctx.pool.string(info.uri).to_owned(),
        };
        let id = self.heap.allocate(HeapData::Namespace(ns));
        self.push_value(context, Value::Ref(id))
    }

    pub(super) fn op_convert_s(&mut self, context: &mut CallContext) -> RunResult<()> {
        let val = context.pop()?;
        if val.is_string(self.heap) {
            return self.push_value(context, val);
        }
        let s = coerce::to_avm_string(&val, self.heap, &self.ctx.pool, &self.ctx.classes);
        val.drop_with_heap(self.heap);
        let v = Value::abstract_s(self.heap, s);
        self.push_value(context, v)
    }

    /// `convert_i`: no stack effect at all when the top is already Integer.
    pub(super) fn op_convert_i(&mut self, context: &mut CallContext) -> RunResult<()> {
        if !context.peek()?.is_integer() {
            let val = context.pop()?;
            let n = coerce::to_int32(&val, self.heap, &self.ctx.pool);
            val.drop_with_heap(self.heap);
            self.push_value(context, Value::abstract_i(n))?;
        }
        Ok(())
    }

    pub(super) fn op_convert_u(&mut self, context: &mut CallContext) -> RunResult<()> {
        if !context.peek()?.is_uinteger() {
            let val = context.pop()?;
            let n = coerce::to_uint32(&val, self.heap, &self.ctx.pool);
            val.drop_with_heap(self.heap);
            self.push_value(context, Value::abstract_ui(n))?;
        }
        Ok(())
    }

    /// `convert_d`: Integer, Boolean, and UInteger inputs produce an
    /// integral Number; Number stays; everything else goes through ToNumber.
    pub(super) fn op_convert_d(&mut self, context: &mut CallContext) -> RunResult<()> {
        let top = context.peek()?;
        match top {
            Value::Int(_) | Value::Bool(_) | Value::UInt(_) => {
                let val = context.pop()?;
                let n = coerce::to_int64(&val, self.heap, &self.ctx.pool);
                val.drop_with_heap(self.heap);
                self.push_value(context, Value::abstract_di(n))?;
            }
            Value::Number(_) => {}
            _ => {
                let val = context.pop()?;
                let n = coerce::to_number(&val, self.heap, &self.ctx.pool);
                val.drop_with_heap(self.heap);
                self.push_value(context, Value::abstract_d(n))?;
            }
        }
        Ok(())
    }

    pub(super) fn op_convert_b(&mut self, context: &mut CallContext) -> RunResult<()> {
        if !context.peek()?.is_boolean() {
            let val = context.pop()?;
            let b = coerce::to_boolean(&val, self.heap, &self.ctx.pool);
            val.drop_with_heap(self.heap);
            self.push_value(context, Value::abstract_b(b))?;
        }
        Ok(())
    }

    /// `convert_o`: only rejects Null and Undefined; anything else is
    /// already an object enough.
    pub(super) fn op_convert_o(&mut self, context: &mut CallContext) -> RunResult<()> {
        let top = context.peek()?;
        if top.is_null() {
            let val = context.pop()?;
            val.drop_with_heap(self.heap);
            log::error!("trying to call convert_o on null");
            return Err(VmError::convert_null_to_object());
        }
        if top.is_undefined() {
            let val = context.pop()?;
            val.drop_with_heap(self.heap);
            log::error!("trying to call convert_o on undefined");
            return Err(VmError::convert_undefined_to_object());
        }
        Ok(())
    }

    /// `coerce_s`: Null and Undefined coerce to Null, strings pass through.
    pub(super) fn op_coerce_s(&mut self, context: &mut CallContext) -> RunResult<()> {
        let val = context.pop()?;
        if val.is_string(self.heap) {
            return self.push_value(context, val);
        }
        if val.is_null() || val.is_undefined() {
            return self.push_value(context, Value::Null);
        }
        let s = coerce::to_avm_string(&val, self.heap, &self.ctx.pool, &self.ctx.classes);
        val.drop_with_heap(self.heap);
        let v = Value::abstract_s(self.heap, s);
        self.push_value(context, v)
    }

    /// `esc_xelem`/`esc_xattr`: ToString plus XML escaping.
    pub(super) fn op_esc_x(&mut self, context: &mut CallContext, attribute: bool) -> RunResult<()> {
        let val = context.pop()?;
        let s = coerce::to_avm_string(&val, self.heap, &self.ctx.pool, &self.ctx.classes);
        val.drop_with_heap(self.heap);
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' if !attribute => out.push_str("&gt;"),
                '"' if attribute => out.push_str("&quot;"),
                '\n' if attribute => out.push_str("&#xA;"),
                '\r' if attribute => out.push_str("&#xD;"),
                '\t' if attribute => out.push_str("&#x9;"),
                _ => out.push(c),
            }
        }
        let v = Value::abstract_s(self.heap, out);
        self.push_value(context, v)
    }
}
