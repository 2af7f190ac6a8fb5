//! Heap object payloads: script objects with typed slots, arrays, function
//! closures, namespaces, and qualified names.

use indexmap::IndexMap;

use crate::{
    class::ClassId,
    context::ScopeEntry,
    heap::HeapId,
    method::MethodId,
    pool::NsKind,
    value::Value,
};

/// A namespace value.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub kind: NsKind,
    pub prefix: Option<String>,
    pub uri: String,
}

impl Namespace {
    pub fn public(uri: impl Into<String>) -> Self {
        Self {
            kind: NsKind::Namespace,
            prefix: None,
            uri: uri.into(),
        }
    }
}

/// A qualified name value. `uri` is `None` for the any-namespace form.
#[derive(Debug, Clone)]
pub struct QName {
    pub uri: Option<String>,
    pub local: String,
}

/// Dense AS3 array storage.
///
/// Holes created by out-of-order index writes read as Undefined, matching the
/// uninitialized-slot rule for locals.
#[derive(Debug, Default)]
pub struct ArrayData {
    dense: Vec<Value>,
}

impl ArrayData {
    pub fn with_values(values: Vec<Value>) -> Self {
        Self { dense: values }
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.dense.push(value);
    }

    /// Borrow of the element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.dense.get(index)
    }

    /// Stores `value` at `index`, growing with Undefined holes and releasing
    /// the previous occupant into `freed` (the caller owns the drop because
    /// it holds the heap).
    pub fn set(&mut self, index: usize, value: Value, freed: &mut Vec<HeapId>) {
        while self.dense.len() <= index {
            self.dense.push(Value::Undefined);
        }
        let old = std::mem::replace(&mut self.dense[index], value);
        if let Value::Ref(id) = old {
            freed.push(id);
        }
    }

    /// Removes and returns the last element.
    pub fn pop_value(&mut self) -> Option<Value> {
        self.dense.pop()
    }

    pub fn values(&self) -> &[Value] {
        &self.dense
    }

    pub(crate) fn child_ids(&self, out: &mut Vec<HeapId>) {
        for v in &self.dense {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
    }
}

/// A script object: typed slots declared by its class traits plus a dynamic
/// property map and an optional prototype link.
///
/// Slot indices are 1-based at the opcode surface; `slots[0]` here is slot 1.
/// Classless objects (activation records, catch scopes, object literals) have
/// no traits and are always dynamic.
#[derive(Debug)]
pub struct ScriptObject {
    pub class: Option<ClassId>,
    slots: Vec<Value>,
    dynamic: IndexMap<String, Value>,
    pub prototype: Option<HeapId>,
    /// Sealed objects reject writes to undeclared names.
    pub sealed: bool,
}

impl ScriptObject {
    /// A plain dynamic object with no class.
    pub fn dynamic_object() -> Self {
        Self {
            class: None,
            slots: Vec::new(),
            dynamic: IndexMap::new(),
            prototype: None,
            sealed: false,
        }
    }

    /// An object with `slot_count` typed slots, all Undefined. Used for
    /// class instances, activations, and catch scopes.
    pub fn with_slots(class: Option<ClassId>, slot_count: usize, sealed: bool) -> Self {
        Self {
            class,
            slots: (0..slot_count).map(|_| Value::Undefined).collect(),
            dynamic: IndexMap::new(),
            prototype: None,
            sealed,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Borrow of 1-based slot `id`.
    pub fn slot(&self, id: u32) -> Option<&Value> {
        id.checked_sub(1).and_then(|i| self.slots.get(i as usize))
    }

    /// Replaces 1-based slot `id`, returning the previous occupant.
    pub fn replace_slot(&mut self, id: u32, value: Value) -> Option<Value> {
        let index = id.checked_sub(1)? as usize;
        let slot = self.slots.get_mut(index)?;
        Some(std::mem::replace(slot, value))
    }

    pub fn get_dynamic(&self, name: &str) -> Option<&Value> {
        self.dynamic.get(name)
    }

    /// Inserts a dynamic property, returning the previous occupant.
    pub fn set_dynamic(&mut self, name: &str, value: Value) -> Option<Value> {
        self.dynamic.insert(name.to_owned(), value)
    }

    /// Removes a dynamic property, returning its value when present.
    pub fn delete_dynamic(&mut self, name: &str) -> Option<Value> {
        self.dynamic.shift_remove(name)
    }

    pub fn has_dynamic(&self, name: &str) -> bool {
        self.dynamic.contains_key(name)
    }

    /// Insertion-ordered dynamic property at 1-based enumeration `position`.
    pub fn dynamic_at(&self, position: usize) -> Option<(&str, &Value)> {
        self.dynamic
            .get_index(position.checked_sub(1)?)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    pub(crate) fn child_ids(&self, out: &mut Vec<HeapId>) {
        for v in self.slots.iter().chain(self.dynamic.values()) {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
        if let Some(proto) = self.prototype {
            out.push(proto);
        }
    }
}

/// A function closure: the method it runs and the scope chain captured at
/// `newfunction` time. The captured entries own their references.
#[derive(Debug)]
pub struct FunctionObject {
    pub method: MethodId,
    pub captured_scope: Vec<ScopeEntry>,
}

impl FunctionObject {
    pub(crate) fn child_ids(&self, out: &mut Vec<HeapId>) {
        for entry in &self.captured_scope {
            if let Value::Ref(id) = &entry.value {
                out.push(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_indices_are_one_based() {
        let mut obj = ScriptObject::with_slots(None, 2, false);
        assert!(obj.slot(0).is_none());
        assert!(matches!(obj.slot(1), Some(Value::Undefined)));
        assert!(obj.slot(3).is_none());
        let old = obj.replace_slot(2, Value::Int(7)).unwrap();
        assert!(matches!(old, Value::Undefined));
        assert!(matches!(obj.slot(2), Some(Value::Int(7))));
    }

    #[test]
    fn dynamic_properties_keep_insertion_order() {
        let mut obj = ScriptObject::dynamic_object();
        obj.set_dynamic("b", Value::Int(1));
        obj.set_dynamic("a", Value::Int(2));
        assert_eq!(obj.dynamic_at(1).unwrap().0, "b");
        assert_eq!(obj.dynamic_at(2).unwrap().0, "a");
        assert!(obj.dynamic_at(3).is_none());
    }

    #[test]
    fn array_set_grows_with_holes() {
        let mut arr = ArrayData::default();
        let mut freed = Vec::new();
        arr.set(2, Value::Int(9), &mut freed);
        assert_eq!(arr.len(), 3);
        assert!(matches!(arr.get(0), Some(Value::Undefined)));
        assert!(matches!(arr.get(2), Some(Value::Int(9))));
        assert!(freed.is_empty());
    }
}
