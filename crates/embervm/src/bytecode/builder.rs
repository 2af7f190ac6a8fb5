//! Bytecode assembler.
//!
//! Emits the exact operand encoding the interpreter reads: fixed-width
//! little-endian operands, absolute branch targets, and the 8-byte operand
//! records reserved for the self-rewriting opcodes.

use super::op::Opcode;
use crate::{
    error::ErrorKind,
    method::{ExceptionHandler, MethodBody},
};

/// A forward-referencable position in the code being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Patch {
    /// Offset of the u32 placeholder to overwrite.
    at: usize,
    label: Label,
}

/// Assembles a [`MethodBody`].
#[derive(Debug)]
pub struct BodyBuilder {
    code: Vec<u8>,
    max_stack: usize,
    local_count: usize,
    max_scope_depth: usize,
    labels: Vec<Option<u32>>,
    patches: Vec<Patch>,
    handlers: Vec<(Label, Label, Label, Option<ErrorKind>)>,
}

impl BodyBuilder {
    pub fn new(max_stack: usize, local_count: usize, max_scope_depth: usize) -> Self {
        Self {
            code: Vec::new(),
            max_stack,
            local_count,
            max_scope_depth,
            labels: Vec::new(),
            patches: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Current code offset.
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.here());
    }

    // --- raw emission -----------------------------------------------------

    /// Emits an opcode with no operands.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    fn u32_operand(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Emits an opcode with one u32 operand.
    pub fn op_u32(&mut self, op: Opcode, operand: u32) -> &mut Self {
        self.code.push(op as u8);
        self.u32_operand(operand);
        self
    }

    /// Emits an opcode with two u32 operands.
    pub fn op_u32x2(&mut self, op: Opcode, a: u32, b: u32) -> &mut Self {
        self.code.push(op as u8);
        self.u32_operand(a);
        self.u32_operand(b);
        self
    }

    // --- literals ---------------------------------------------------------

    pub fn push_byte(&mut self, v: i8) -> &mut Self {
        self.code.push(Opcode::PushByte as u8);
        self.code.push(v as u8);
        self
    }

    pub fn push_double(&mut self, v: f64) -> &mut Self {
        self.code.push(Opcode::PushDouble as u8);
        self.code.extend_from_slice(&v.to_le_bytes());
        self
    }

    // --- control flow -----------------------------------------------------

    /// Emits a branch opcode targeting `label`.
    pub fn branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.code.push(op as u8);
        self.patches.push(Patch {
            at: self.code.len(),
            label,
        });
        self.u32_operand(0);
        self
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::Jump, label)
    }

    /// Emits a lookupswitch with `cases.len()` dense case targets plus the
    /// trailing extra case slot the encoding carries (count + 1 entries).
    pub fn lookup_switch(&mut self, default: Label, cases: &[Label]) -> &mut Self {
        assert!(!cases.is_empty(), "lookupswitch needs at least one case");
        self.code.push(Opcode::LookupSwitch as u8);
        self.patches.push(Patch {
            at: self.code.len(),
            label: default,
        });
        self.u32_operand(0);
        self.u32_operand((cases.len() - 1) as u32);
        for case in cases {
            self.patches.push(Patch {
                at: self.code.len(),
                label: *case,
            });
            self.u32_operand(0);
        }
        self
    }

    // --- self-rewriting sites ---------------------------------------------

    /// Emits `coerce` with its 8-byte operand record: the u32 multiname index
    /// followed by 4 reserved bytes the rewrite will reuse.
    pub fn coerce(&mut self, multiname: u32) -> &mut Self {
        self.code.push(Opcode::Coerce as u8);
        self.u32_operand(multiname);
        self.u32_operand(0);
        self
    }

    /// Emits `getlexonce` with its 8-byte operand record.
    pub fn getlexonce(&mut self, multiname: u32) -> &mut Self {
        self.code.push(Opcode::GetLexOnce as u8);
        self.u32_operand(multiname);
        self.u32_operand(0);
        self
    }

    // --- exception handlers -----------------------------------------------

    /// Registers a handler covering `[from, to)` that resumes at `target`.
    pub fn handler(&mut self, from: Label, to: Label, target: Label, catch_kind: Option<ErrorKind>) -> &mut Self {
        self.handlers.push((from, to, target, catch_kind));
        self
    }

    // --- finish -----------------------------------------------------------

    /// Resolves every label and produces the method body.
    ///
    /// # Panics
    /// Panics if a referenced label was never bound; that is a builder-usage
    /// bug, not a runtime condition.
    pub fn finish(mut self) -> MethodBody {
        for patch in &self.patches {
            let target = self.labels[patch.label.0].expect("label bound before finish");
            self.code[patch.at..patch.at + 4].copy_from_slice(&target.to_le_bytes());
        }
        let mut body = MethodBody::new(self.code, self.max_stack, self.local_count, self.max_scope_depth);
        for (from, to, target, catch_kind) in &self.handlers {
            body.exceptions.push(ExceptionHandler {
                from: self.labels[from.0].expect("label bound before finish"),
                to: self.labels[to.0].expect("label bound before finish"),
                target: self.labels[target.0].expect("label bound before finish"),
                catch_kind: *catch_kind,
            });
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_targets_are_absolute() {
        let mut b = BodyBuilder::new(4, 1, 1);
        let target = b.new_label();
        b.push_byte(1);
        b.jump(target);
        b.push_byte(2);
        b.bind(target);
        b.op(Opcode::ReturnVoid);
        let body = b.finish();
        // jump operand points at the returnvoid byte
        let jump_operand = u32::from_le_bytes(body.code[3..7].try_into().unwrap());
        assert_eq!(body.code[jump_operand as usize], Opcode::ReturnVoid as u8);
    }

    #[test]
    fn coerce_record_is_eight_bytes() {
        let mut b = BodyBuilder::new(4, 1, 1);
        b.coerce(7);
        b.op(Opcode::ReturnVoid);
        let body = b.finish();
        assert_eq!(body.code[0], Opcode::Coerce as u8);
        assert_eq!(body.code.len(), 1 + 8 + 1);
        assert_eq!(u32::from_le_bytes(body.code[1..5].try_into().unwrap()), 7);
    }

    #[test]
    fn lookup_switch_layout() {
        let mut b = BodyBuilder::new(4, 1, 1);
        let def = b.new_label();
        let c0 = b.new_label();
        b.lookup_switch(def, &[c0, c0, c0]);
        b.bind(def);
        b.bind(c0);
        b.op(Opcode::ReturnVoid);
        let body = b.finish();
        let count = u32::from_le_bytes(body.code[5..9].try_into().unwrap());
        assert_eq!(count, 2, "count operand is cases - 1");
        assert_eq!(body.code.len(), 1 + 4 + 4 + 3 * 4 + 1);
    }
}
