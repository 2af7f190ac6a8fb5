//! Bytecode representation and the virtual machine.
//!
//! - `op` - opcode enum at the AVM2 byte values
//! - `builder` - assembler emitting the interpreter's operand encoding
//! - `vm` - the dispatch loop and opcode implementations

mod builder;
mod op;
mod vm;

pub use builder::{BodyBuilder, Label};
pub use op::Opcode;
pub use vm::{Interpreter, Return};
