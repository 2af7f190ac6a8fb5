//! Static method descriptors and the mutable method body.

use crate::{class::TypeRef, error::ErrorKind, value::Value};

/// Index of a method in the ABC context's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub(crate) u32);

impl MethodId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw table index, as encoded in `newfunction`/`callstatic`
    /// operands.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One entry of a method body's exception-handler table.
///
/// A handler covers the byte range `[from, to)`; when an error is raised at
/// an `exec_pos` inside the range and the handler's catch kind matches, the
/// operand stack is cleared, the error value is pushed, and execution resumes
/// at `target`.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
    pub from: u32,
    pub to: u32,
    pub target: u32,
    /// Catch kind; `None` catches everything catchable.
    pub catch_kind: Option<ErrorKind>,
}

impl ExceptionHandler {
    pub fn covers(&self, pos: u32) -> bool {
        pos >= self.from && pos < self.to
    }
}

/// A resolved reference cached by a self-rewriting opcode.
///
/// The rewritten operand record stores a u64 index into the body's side
/// table; this is the safe-language realization of the original's in-place
/// pointer write. `Value` bindings own one reference for the lifetime of the
/// body.
#[derive(Debug)]
pub enum EarlyBinding {
    Type(TypeRef),
    Value(Value),
}

/// The executable body of a method.
///
/// `code` is mutated in place by the self-rewriting opcodes; after the first
/// execution of a `coerce` or `getlexonce` site, the opcode byte and operand
/// record observed at that offset change permanently.
#[derive(Debug)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub max_stack: usize,
    pub local_count: usize,
    pub max_scope_depth: usize,
    pub exceptions: Vec<ExceptionHandler>,
    pub early_bindings: Vec<EarlyBinding>,
    /// Number of completed executions; profiling counter.
    pub exec_count: u64,
}

impl MethodBody {
    pub fn new(code: Vec<u8>, max_stack: usize, local_count: usize, max_scope_depth: usize) -> Self {
        Self {
            code,
            max_stack,
            local_count,
            max_scope_depth,
            exceptions: Vec::new(),
            early_bindings: Vec::new(),
            exec_count: 0,
        }
    }

    /// Finds the first handler covering `pos` whose catch kind matches.
    pub fn find_handler(&self, pos: u32, raised: ErrorKind) -> Option<&ExceptionHandler> {
        self.exceptions.iter().find(|h| {
            h.covers(pos)
                && match h.catch_kind {
                    None => raised != ErrorKind::ParseException,
                    Some(kind) => raised.is_caught_by(kind),
                }
        })
    }

    /// Appends an early binding and returns its side-table index for the
    /// rewritten operand record.
    pub(crate) fn add_early_binding(&mut self, binding: EarlyBinding) -> u64 {
        self.early_bindings.push(binding);
        (self.early_bindings.len() - 1) as u64
    }
}

/// The static descriptor of a method.
#[derive(Debug)]
pub struct MethodInfo {
    pub name: String,
    /// Declared parameter count (excluding `this`).
    pub param_count: usize,
    /// When set, surplus arguments are collected into a rest Array placed at
    /// local `param_count + 1`; writes to that slot are guarded.
    pub needs_rest: bool,
    /// Slot count of the activation object created by `newactivation`.
    pub activation_slots: usize,
    pub body: MethodBody,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, param_count: usize, body: MethodBody) -> Self {
        Self {
            name: name.into(),
            param_count,
            needs_rest: false,
            activation_slots: 0,
            body,
        }
    }

    /// Local index of the rest-argument array, when the method declares one.
    pub fn arg_array_position(&self) -> Option<usize> {
        self.needs_rest.then_some(self.param_count + 1)
    }
}
