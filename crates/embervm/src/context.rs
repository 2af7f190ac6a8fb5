//! The per-invocation call context and the shared ABC context.

use crate::{
    class::ClassTable,
    domain::ApplicationDomain,
    error::{RunResult, VmError},
    heap::Heap,
    method::{MethodId, MethodInfo},
    pool::ConstantPool,
    value::Value,
};

/// One entry of a scope chain.
///
/// `with` scopes (pushed by `pushwith`) take part in dynamic property lookup
/// including the prototype chain; lexical scopes (pushed by `pushscope`) are
/// consulted for declared traits only.
#[derive(Debug)]
pub struct ScopeEntry {
    pub value: Value,
    pub is_with: bool,
}

/// Shared state of an ABC context: constant pool, class table, method table,
/// and the application domain.
#[derive(Debug)]
pub struct AbcContext {
    pub pool: ConstantPool,
    pub classes: ClassTable,
    pub methods: Vec<MethodInfo>,
    pub domain: ApplicationDomain,
}

impl AbcContext {
    pub fn new(heap: &mut Heap) -> Self {
        Self {
            pool: ConstantPool::new(),
            classes: ClassTable::with_builtins(),
            methods: Vec::new(),
            domain: ApplicationDomain::new(heap),
        }
    }

    pub fn add_method(&mut self, info: MethodInfo) -> MethodId {
        let id = MethodId(u32::try_from(self.methods.len()).expect("method table overflow"));
        self.methods.push(info);
        id
    }

    #[must_use]
    pub fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodInfo {
        &mut self.methods[id.index()]
    }
}

/// State owned by one method invocation.
///
/// Every value on the operand stack, in a local register, or in a scope slot
/// holds one reference; [`CallContext::teardown`] releases whatever is still
/// held when the invocation ends.
#[derive(Debug)]
pub struct CallContext {
    stack: Vec<Value>,
    locals: Vec<Value>,
    scope: Vec<ScopeEntry>,
    /// Immutable scope chain captured at closure creation; indexed before the
    /// current scope by `getscopeatindex`.
    parent_scope: Vec<ScopeEntry>,
    /// Instruction pointer of the opcode being executed, recorded before each
    /// dispatch so exception handling can locate handlers.
    pub exec_pos: usize,
    /// Local index of the rest-argument array; writes to it are guarded.
    pub argarrayposition: Option<usize>,
    default_xml_ns: Option<Value>,
    max_stack: usize,
    max_scope_depth: usize,
}

impl CallContext {
    /// A context with `local_count` Undefined locals. `locals[0]` must be set
    /// to the receiver before execution.
    pub fn new(max_stack: usize, local_count: usize, max_scope_depth: usize) -> Self {
        Self {
            stack: Vec::with_capacity(max_stack),
            locals: (0..local_count).map(|_| Value::Undefined).collect(),
            scope: Vec::new(),
            parent_scope: Vec::new(),
            exec_pos: 0,
            argarrayposition: None,
            default_xml_ns: None,
            max_stack,
            max_scope_depth,
        }
    }

    // --- operand stack ----------------------------------------------------

    pub fn push(&mut self, value: Value) -> RunResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(VmError::stack_overflow());
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(VmError::stack_underflow)
    }

    pub fn peek(&self) -> RunResult<&Value> {
        self.stack.last().ok_or_else(VmError::stack_underflow)
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn max_scope_depth(&self) -> usize {
        self.max_scope_depth
    }

    /// Swaps the top two stack entries.
    pub fn swap_top(&mut self) -> RunResult<()> {
        let len = self.stack.len();
        if len < 2 {
            return Err(VmError::stack_underflow());
        }
        self.stack.swap(len - 1, len - 2);
        Ok(())
    }

    /// Drops every value still on the operand stack. Used when an exception
    /// handler is entered.
    pub fn clear_stack(&mut self, heap: &mut Heap) {
        for value in self.stack.drain(..) {
            value.drop_with_heap(heap);
        }
    }

    // --- locals -----------------------------------------------------------

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn local(&self, index: usize) -> Option<&Value> {
        self.locals.get(index)
    }

    /// Replaces a local, releasing the previous occupant. Takes ownership of
    /// one reference to `value`.
    pub fn set_local(&mut self, index: usize, value: Value, heap: &mut Heap) {
        let old = std::mem::replace(&mut self.locals[index], value);
        old.drop_with_heap(heap);
    }

    // --- scope stacks -----------------------------------------------------

    pub fn push_scope_entry(&mut self, entry: ScopeEntry) -> RunResult<()> {
        if self.scope.len() >= self.max_scope_depth {
            return Err(VmError::verify_error(
                crate::error::K_SCOPE_STACK_OVERFLOW,
                "scope stack overflow",
            ));
        }
        self.scope.push(entry);
        Ok(())
    }

    pub fn pop_scope_entry(&mut self) -> RunResult<ScopeEntry> {
        self.scope.pop().ok_or_else(|| {
            VmError::verify_error(crate::error::K_SCOPE_STACK_UNDERFLOW, "scope stack underflow")
        })
    }

    /// Current (mutable) scope region only, bottom-indexed.
    pub fn scope_at(&self, index: usize) -> Option<&ScopeEntry> {
        self.scope.get(index)
    }

    pub fn scope_depth(&self) -> usize {
        self.scope.len()
    }

    pub fn parent_scope_depth(&self) -> usize {
        self.parent_scope.len()
    }

    /// Effective chain entry: parent region first, then the current region.
    pub fn scope_at_effective(&self, index: usize) -> Option<&ScopeEntry> {
        let parents = self.parent_scope.len();
        if index < parents {
            self.parent_scope.get(index)
        } else {
            self.scope.get(index - parents)
        }
    }

    /// Entries of the effective chain from innermost to outermost: the
    /// current region top-down, then the parent region top-down.
    pub fn scopes_innermost_first(&self) -> impl Iterator<Item = &ScopeEntry> {
        self.scope.iter().rev().chain(self.parent_scope.iter().rev())
    }

    /// First entry of the effective chain, used by `getglobalscope`.
    pub fn global_scope(&self) -> Option<&ScopeEntry> {
        self.parent_scope.first().or_else(|| self.scope.first())
    }

    /// Installs the captured parent scope chain. Takes ownership of the
    /// entries' references.
    pub fn set_parent_scope(&mut self, entries: Vec<ScopeEntry>) {
        debug_assert!(self.parent_scope.is_empty());
        self.parent_scope = entries;
    }

    /// Snapshot of the effective chain (parent then current), duplicating
    /// every reference; used by `newfunction` to capture closures.
    pub fn capture_scope(&self, heap: &mut Heap) -> Vec<ScopeEntry> {
        let mut captured = Vec::with_capacity(self.parent_scope.len() + self.scope.len());
        for entry in self.parent_scope.iter().chain(self.scope.iter()) {
            captured.push(ScopeEntry {
                value: entry.value.copy_tag(),
                is_with: entry.is_with,
            });
        }
        for entry in &captured {
            if let Value::Ref(id) = &entry.value {
                heap.inc_ref(*id);
            }
        }
        captured
    }

    // --- default XML namespace --------------------------------------------

    /// Installs the default XML namespace, releasing the previous one.
    pub fn set_default_xml_ns(&mut self, value: Value, heap: &mut Heap) {
        if let Some(old) = self.default_xml_ns.replace(value) {
            old.drop_with_heap(heap);
        }
    }

    pub fn default_xml_ns(&self) -> Option<&Value> {
        self.default_xml_ns.as_ref()
    }

    // --- lifecycle --------------------------------------------------------

    /// Releases every reference still held by the context. Must run exactly
    /// once, after execution completes or the error has propagated.
    pub fn teardown(&mut self, heap: &mut Heap) {
        for value in self.stack.drain(..) {
            value.drop_with_heap(heap);
        }
        for value in self.locals.drain(..) {
            value.drop_with_heap(heap);
        }
        for entry in self.scope.drain(..).chain(self.parent_scope.drain(..)) {
            entry.value.drop_with_heap(heap);
        }
        if let Some(ns) = self.default_xml_ns.take() {
            ns.drop_with_heap(heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_bounds_are_enforced() {
        let mut ctx = CallContext::new(2, 1, 1);
        ctx.push(Value::Int(1)).unwrap();
        ctx.push(Value::Int(2)).unwrap();
        assert!(ctx.push(Value::Int(3)).is_err());
        ctx.pop().unwrap();
        ctx.pop().unwrap();
        assert!(ctx.pop().is_err());
    }

    #[test]
    fn effective_scope_indexes_parent_first() {
        let mut ctx = CallContext::new(4, 1, 4);
        ctx.set_parent_scope(vec![ScopeEntry {
            value: Value::Int(10),
            is_with: false,
        }]);
        ctx.push_scope_entry(ScopeEntry {
            value: Value::Int(20),
            is_with: false,
        })
        .unwrap();
        assert!(matches!(ctx.scope_at_effective(0).unwrap().value, Value::Int(10)));
        assert!(matches!(ctx.scope_at_effective(1).unwrap().value, Value::Int(20)));
        assert!(matches!(ctx.global_scope().unwrap().value, Value::Int(10)));
    }

    #[test]
    fn teardown_releases_everything() {
        let mut heap = Heap::new();
        let mut ctx = CallContext::new(4, 2, 2);
        let s = Value::abstract_s(&mut heap, "s");
        ctx.push(s).unwrap();
        let l = Value::abstract_s(&mut heap, "l");
        ctx.set_local(1, l, &mut heap);
        let sc = Value::abstract_s(&mut heap, "sc");
        ctx.push_scope_entry(ScopeEntry {
            value: sc,
            is_with: false,
        })
        .unwrap();
        assert_eq!(heap.live_count(), 3);
        ctx.teardown(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }
}
