//! The application domain: global definitions and the flat memory buffer
//! used by the Alchemy load/store opcodes.

use crate::{
    heap::{Heap, HeapData, HeapId},
    object::ScriptObject,
    value::Value,
};

/// Per-context global state reached by name lookup and the memory opcodes.
#[derive(Debug)]
pub struct ApplicationDomain {
    global: HeapId,
    /// Flat byte buffer addressed by the Alchemy opcodes.
    pub memory: Vec<u8>,
}

impl ApplicationDomain {
    /// Creates the domain with an empty global object. The domain owns one
    /// reference to it for its whole lifetime.
    pub fn new(heap: &mut Heap) -> Self {
        let global = heap.allocate(HeapData::Object(ScriptObject::dynamic_object()));
        Self {
            global,
            memory: Vec::new(),
        }
    }

    /// The global object backing top-level definitions.
    pub fn global(&self) -> HeapId {
        self.global
    }

    /// Defines (or replaces) a global binding. Takes ownership of one
    /// reference to `value`.
    pub fn define_global(&mut self, heap: &mut Heap, name: &str, value: Value) {
        let HeapData::Object(obj) = heap.get_mut(self.global) else {
            unreachable!("domain global is always an object");
        };
        let old = obj.set_dynamic(name, value);
        if let Some(old) = old {
            old.drop_with_heap(heap);
        }
    }

    pub fn has_global(&self, heap: &Heap, name: &str) -> bool {
        let HeapData::Object(obj) = heap.get(self.global) else {
            unreachable!("domain global is always an object");
        };
        obj.has_dynamic(name)
    }

    /// Looks up a global binding, returning an owned duplicate.
    pub fn lookup_global(&self, heap: &mut Heap, name: &str) -> Option<Value> {
        let HeapData::Object(obj) = heap.get(self.global) else {
            unreachable!("domain global is always an object");
        };
        let value = obj.get_dynamic(name)?.copy_tag();
        Some(value.clone_with_heap(heap))
    }

    /// Resizes the Alchemy memory buffer, zero-filling new space.
    pub fn resize_memory(&mut self, size: usize) {
        self.memory.resize(size, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_bindings_replace_and_release() {
        let mut heap = Heap::new();
        let mut domain = ApplicationDomain::new(&mut heap);
        let first = Value::abstract_s(&mut heap, "one");
        domain.define_global(&mut heap, "x", first);
        let second = Value::abstract_s(&mut heap, "two");
        domain.define_global(&mut heap, "x", second);
        // global object plus the single live string
        assert_eq!(heap.live_count(), 2);
        let got = domain.lookup_global(&mut heap, "x").unwrap();
        got.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 2);
    }
}
