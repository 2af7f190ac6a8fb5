//! Runtime multiname resolution.
//!
//! Names in bytecode are indices into the constant pool. Resolution produces
//! a per-call scratch [`Multiname`]; the late (`RT`) kinds pop their missing
//! components from the operand stack, and [`Multiname::reset_name_if_object`]
//! releases the transient reference once the consuming opcode is done.

use crate::{
    class::ClassTable,
    coerce,
    error::{RunResult, VmError},
    heap::{Heap, HeapData},
    pool::{ConstantPool, MnKind},
    value::Value,
};

/// A resolved name: local name plus the namespace URIs it may bind in.
#[derive(Debug)]
pub struct Multiname {
    pub local: String,
    pub ns_uris: Vec<String>,
    pub attribute: bool,
    /// True for the any-name (`*`) entry.
    pub any: bool,
    /// The runtime name component popped from the stack, still owning one
    /// reference until `reset_name_if_object`.
    runtime_name: Option<Value>,
}

impl Multiname {
    /// Resolves the multiname at `index`, popping runtime components through
    /// `pop` (late kinds pop the name first, then the namespace).
    pub fn resolve(
        index: u32,
        pool: &ConstantPool,
        heap: &Heap,
        classes: &ClassTable,
        mut pop: impl FnMut() -> RunResult<Value>,
    ) -> RunResult<(Self, Vec<Value>)> {
        let info = pool
            .multiname(index)
            .ok_or_else(|| VmError::parse_exception(format!("multiname index {index} out of range")))?;

        let mut consumed = Vec::new();
        let mut runtime_name = None;

        let local = match info.name {
            Some(id) => pool.string(id).to_owned(),
            None if matches!(info.kind, MnKind::RtqNameL | MnKind::MultinameL) => {
                let name_value = pop()?;
                let local = match heap_qname_local(&name_value, heap) {
                    Some(local) => local,
                    None => coerce::to_avm_string(&name_value, heap, pool, classes),
                };
                runtime_name = Some(name_value);
                local
            }
            None => String::new(),
        };

        let mut ns_uris = Vec::new();
        match info.kind {
            MnKind::RtqName | MnKind::RtqNameL => {
                let ns_value = pop()?;
                if let Value::Ref(id) = &ns_value {
                    if let HeapData::Namespace(ns) = heap.get(*id) {
                        ns_uris.push(ns.uri.clone());
                    }
                }
                consumed.push(ns_value);
            }
            MnKind::QName => {
                if let Some(ns) = info.ns.and_then(|i| pool.namespace(i)) {
                    ns_uris.push(pool.string(ns.uri).to_owned());
                }
            }
            MnKind::Multiname | MnKind::MultinameL => {
                for ns_index in &info.ns_set {
                    if let Some(ns) = pool.namespace(*ns_index) {
                        ns_uris.push(pool.string(ns.uri).to_owned());
                    }
                }
            }
        }

        let any = info.name.is_none() && runtime_name.is_none();
        Ok((
            Self {
                local,
                ns_uris,
                attribute: info.attribute,
                any,
                runtime_name,
            },
            consumed,
        ))
    }

    /// Releases the runtime name component, if one was popped.
    pub fn reset_name_if_object(&mut self, heap: &mut Heap) {
        if let Some(v) = self.runtime_name.take() {
            v.drop_with_heap(heap);
        }
    }
}

impl Drop for Multiname {
    fn drop(&mut self) {
        debug_assert!(
            self.runtime_name.is_none(),
            "Multiname dropped without reset_name_if_object"
        );
    }
}

impl std::fmt::Display for Multiname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.any {
            write!(f, "*")
        } else {
            write!(f, "{}", self.local)
        }
    }
}

/// A QName value used as a runtime name resolves to its local name rather
/// than its string form.
fn heap_qname_local(value: &Value, heap: &Heap) -> Option<String> {
    match value {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::QName(q) => Some(q.local.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{MnKind, MultinameInfo};

    #[test]
    fn fixed_qname_resolution_pops_nothing() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_qname("foo");
        let heap = Heap::new();
        let classes = ClassTable::with_builtins();
        let (mut mn, consumed) = Multiname::resolve(idx, &pool, &heap, &classes, || {
            panic!("fixed multiname must not pop")
        })
        .unwrap();
        assert_eq!(mn.local, "foo");
        assert!(!mn.any);
        assert!(consumed.is_empty());
        let mut heap = Heap::new();
        mn.reset_name_if_object(&mut heap);
    }

    #[test]
    fn late_name_is_popped_and_released() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_multiname(MultinameInfo {
            kind: MnKind::MultinameL,
            name: None,
            ns: None,
            ns_set: vec![0],
            attribute: false,
        });
        let mut heap = Heap::new();
        let classes = ClassTable::with_builtins();
        let name = Value::abstract_s(&mut heap, "bar");
        let mut slot = Some(name);
        let (mut mn, consumed) =
            Multiname::resolve(idx, &pool, &heap, &classes, || Ok(slot.take().expect("one pop"))).unwrap();
        assert_eq!(mn.local, "bar");
        assert!(consumed.is_empty());
        assert_eq!(heap.live_count(), 1);
        mn.reset_name_if_object(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }
}
