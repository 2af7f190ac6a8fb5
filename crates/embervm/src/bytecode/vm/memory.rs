//! Alchemy memory opcodes: little-endian loads and stores against the
//! application domain's flat byte buffer.

use super::{Interpreter, Opcode};
use crate::{coerce, context::CallContext, error::{RunResult, VmError}, value::Value};

impl Interpreter<'_> {
    fn memory_range(&self, addr: u32, width: usize) -> RunResult<usize> {
        let start = addr as usize;
        let end = start.checked_add(width).ok_or_else(VmError::invalid_range)?;
        if end <= self.ctx.domain.memory.len() {
            Ok(start)
        } else {
            Err(VmError::invalid_range())
        }
    }

    /// `li8`/`li16`/`li32`/`lf32`/`lf64`: pop the address, push the loaded
    /// value.
    pub(super) fn op_load_memory(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let addr_v = context.pop()?;
        let addr = coerce::to_uint32(&addr_v, self.heap, &self.ctx.pool);
        addr_v.drop_with_heap(self.heap);

        let ret = match opcode {
            Opcode::Li8 => {
                let start = self.memory_range(addr, 1)?;
                Value::abstract_i(i32::from(self.ctx.domain.memory[start]))
            }
            Opcode::Li16 => {
                let start = self.memory_range(addr, 2)?;
                let bytes = &self.ctx.domain.memory[start..start + 2];
                let v = u16::from_le_bytes(bytes.try_into().expect("2-byte slice"));
                Value::abstract_i(i32::from(v))
            }
            Opcode::Li32 => {
                let start = self.memory_range(addr, 4)?;
                let bytes = &self.ctx.domain.memory[start..start + 4];
                let v = u32::from_le_bytes(bytes.try_into().expect("4-byte slice"));
                Value::abstract_i(v as i32)
            }
            Opcode::Lf32 => {
                let start = self.memory_range(addr, 4)?;
                let bytes = &self.ctx.domain.memory[start..start + 4];
                let v = f32::from_le_bytes(bytes.try_into().expect("4-byte slice"));
                Value::abstract_d(f64::from(v))
            }
            Opcode::Lf64 => {
                let start = self.memory_range(addr, 8)?;
                let bytes = &self.ctx.domain.memory[start..start + 8];
                let v = f64::from_le_bytes(bytes.try_into().expect("8-byte slice"));
                Value::abstract_d(v)
            }
            _ => unreachable!("not a memory load"),
        };
        self.push_value(context, ret)
    }

    /// `si8`/`si16`/`si32`/`sf32`/`sf64`: the address is on top of the
    /// stack, the value below it.
    pub(super) fn op_store_memory(&mut self, context: &mut CallContext, opcode: Opcode) -> RunResult<()> {
        let addr_v = context.pop()?;
        let value_v = context.pop()?;
        let addr = coerce::to_uint32(&addr_v, self.heap, &self.ctx.pool);
        addr_v.drop_with_heap(self.heap);

        let result = match opcode {
            Opcode::Si8 => {
                let v = coerce::to_int32(&value_v, self.heap, &self.ctx.pool);
                self.memory_range(addr, 1).map(|start| {
                    self.ctx.domain.memory[start] = v as u8;
                })
            }
            Opcode::Si16 => {
                let v = coerce::to_int32(&value_v, self.heap, &self.ctx.pool);
                self.memory_range(addr, 2).map(|start| {
                    self.ctx.domain.memory[start..start + 2].copy_from_slice(&(v as u16).to_le_bytes());
                })
            }
            Opcode::Si32 => {
                let v = coerce::to_int32(&value_v, self.heap, &self.ctx.pool);
                self.memory_range(addr, 4).map(|start| {
                    self.ctx.domain.memory[start..start + 4].copy_from_slice(&v.to_le_bytes());
                })
            }
            Opcode::Sf32 => {
                let v = coerce::to_number(&value_v, self.heap, &self.ctx.pool);
                self.memory_range(addr, 4).map(|start| {
                    self.ctx.domain.memory[start..start + 4].copy_from_slice(&(v as f32).to_le_bytes());
                })
            }
            Opcode::Sf64 => {
                let v = coerce::to_number(&value_v, self.heap, &self.ctx.pool);
                self.memory_range(addr, 8).map(|start| {
                    self.ctx.domain.memory[start..start + 8].copy_from_slice(&v.to_le_bytes());
                })
            }
            _ => unreachable!("not a memory store"),
        };
        value_v.drop_with_heap(self.heap);
        result
    }
}
