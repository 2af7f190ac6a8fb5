//! Opcode definitions.
//!
//! Bytecode is stored as raw `Vec<u8>`. The `Opcode` enum is a pure
//! discriminant with no data - operands follow the opcode byte in the stream
//! and are fetched separately, always little-endian and of fixed width per
//! opcode.

use strum::FromRepr;

/// Opcode discriminant at its AVM2 byte value.
///
/// With `#[repr(u8)]`, each opcode is exactly 1 byte. Uses `strum::FromRepr`
/// for byte-to-opcode conversion; bytes with no entry here raise a
/// ParseException in the dispatch loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum Opcode {
    Bkpt = 0x01,
    Nop = 0x02,
    Throw = 0x03,
    /// Operand: u32 multiname.
    GetSuper = 0x04,
    /// Operand: u32 multiname.
    SetSuper = 0x05,
    /// Operand: u32 string.
    Dxns = 0x06,
    DxnsLate = 0x07,
    /// Operand: u32 local index.
    Kill = 0x08,

    // === Control flow (operand: u32 absolute target) ===
    IfNlt = 0x0C,
    IfNle = 0x0D,
    IfNgt = 0x0E,
    IfNge = 0x0F,
    Jump = 0x10,
    IfTrue = 0x11,
    IfFalse = 0x12,
    IfEq = 0x13,
    IfNe = 0x14,
    IfLt = 0x15,
    IfLe = 0x16,
    IfGt = 0x17,
    IfGe = 0x18,
    IfStrictEq = 0x19,
    IfStrictNe = 0x1A,
    /// Operands: u32 default, u32 count, (count+1) u32 case targets.
    LookupSwitch = 0x1B,

    PushWith = 0x1C,
    PopScope = 0x1D,
    NextName = 0x1E,
    PushNull = 0x20,
    PushUndefined = 0x21,
    NextValue = 0x23,
    /// Operand: i8.
    PushByte = 0x24,
    /// Operand: u32. The ABC specification says u30, but the encoding is a
    /// full u32 (ASC-4181); preserved here.
    PushShort = 0x25,
    PushTrue = 0x26,
    PushFalse = 0x27,
    PushNan = 0x28,
    Pop = 0x29,
    Dup = 0x2A,
    Swap = 0x2B,
    /// Operand: u32 string.
    PushString = 0x2C,
    /// Operand: u32 int-pool index.
    PushInt = 0x2D,
    /// Operand: u32 uint-pool index.
    PushUint = 0x2E,
    /// Operand: f64.
    PushDouble = 0x2F,
    PushScope = 0x30,
    /// Operand: u32 namespace.
    PushNamespace = 0x31,
    /// Operands: u32 object local, u32 index local.
    HasNext2 = 0x32,

    // === Alchemy memory ===
    Li8 = 0x35,
    Li16 = 0x36,
    Li32 = 0x37,
    Lf32 = 0x38,
    Lf64 = 0x39,
    Si8 = 0x3A,
    Si16 = 0x3B,
    Si32 = 0x3C,
    Sf32 = 0x3D,
    Sf64 = 0x3E,

    /// Operand: u32 method.
    NewFunction = 0x40,
    /// Operand: u32 argc.
    Call = 0x41,
    /// Operand: u32 argc.
    Construct = 0x42,
    /// Operands: u32 method, u32 argc.
    CallStatic = 0x44,
    /// Operands: u32 multiname, u32 argc.
    CallSuper = 0x45,
    /// Operands: u32 multiname, u32 argc.
    CallProperty = 0x46,
    ReturnVoid = 0x47,
    ReturnValue = 0x48,
    /// Operand: u32 argc.
    ConstructSuper = 0x49,
    /// Operands: u32 multiname, u32 argc.
    ConstructProp = 0x4A,
    /// Identical to CallProperty in this implementation.
    CallPropLex = 0x4C,
    /// Operands: u32 multiname, u32 argc.
    CallSuperVoid = 0x4E,
    /// Operands: u32 multiname, u32 argc.
    CallPropVoid = 0x4F,

    Sxi1 = 0x50,
    Sxi8 = 0x51,
    Sxi16 = 0x52,
    /// Operand: u32 type-parameter count.
    ConstructGenericType = 0x53,
    /// Operand: u32 pair count.
    NewObject = 0x55,
    /// Operand: u32 element count.
    NewArray = 0x56,
    NewActivation = 0x57,
    /// Operand: u32 class index.
    NewClass = 0x58,
    /// Operand: u32 multiname.
    GetDescendants = 0x59,
    /// Operand: u32 handler index.
    NewCatch = 0x5A,
    /// Operand: u32 multiname.
    FindPropStrict = 0x5D,
    /// Operand: u32 multiname.
    FindProperty = 0x5E,
    /// Operand: u32 multiname. Intentionally unimplemented: logs and pushes
    /// Null.
    FindDef = 0x5F,
    /// Operand: u32 multiname.
    GetLex = 0x60,
    /// Operand: u32 multiname.
    SetProperty = 0x61,
    /// Operand: u32 local index.
    GetLocal = 0x62,
    /// Operand: u32 local index.
    SetLocal = 0x63,
    GetGlobalScope = 0x64,
    /// Operand: u32 scope index.
    GetScopeObject = 0x65,
    /// Operand: u32 multiname.
    GetProperty = 0x66,
    /// Operand: u32 multiname.
    InitProperty = 0x68,
    /// Operand: u32 multiname.
    DeleteProperty = 0x6A,
    /// Operand: u32 slot (1-based).
    GetSlot = 0x6C,
    /// Operand: u32 slot (1-based).
    SetSlot = 0x6D,
    /// Operand: u32 slot (1-based).
    GetGlobalSlot = 0x6E,
    /// Operand: u32 slot (1-based).
    SetGlobalSlot = 0x6F,

    ConvertS = 0x70,
    EscXelem = 0x71,
    EscXattr = 0x72,
    ConvertI = 0x73,
    ConvertU = 0x74,
    ConvertD = 0x75,
    ConvertB = 0x76,
    ConvertO = 0x77,
    CheckFilter = 0x78,

    /// Operand: u32 multiname, padded to 8 bytes; rewrites itself to
    /// CoerceEarly on first execution.
    Coerce = 0x80,
    CoerceA = 0x82,
    CoerceS = 0x85,
    /// Operand: u32 multiname.
    AsType = 0x86,
    AsTypeLate = 0x87,

    Negate = 0x90,
    Increment = 0x91,
    /// Operand: u32 local index.
    IncLocal = 0x92,
    Decrement = 0x93,
    /// Operand: u32 local index.
    DecLocal = 0x94,
    TypeOf = 0x95,
    Not = 0x96,
    BitNot = 0x97,

    Add = 0xA0,
    Subtract = 0xA1,
    Multiply = 0xA2,
    Divide = 0xA3,
    Modulo = 0xA4,
    Lshift = 0xA5,
    Rshift = 0xA6,
    Urshift = 0xA7,
    BitAnd = 0xA8,
    BitOr = 0xA9,
    BitXor = 0xAA,
    Equals = 0xAB,
    StrictEquals = 0xAC,
    LessThan = 0xAD,
    LessEquals = 0xAE,
    GreaterThan = 0xAF,
    GreaterEquals = 0xB0,
    InstanceOf = 0xB1,
    /// Operand: u32 multiname.
    IsType = 0xB2,
    IsTypeLate = 0xB3,
    In = 0xB4,

    IncrementI = 0xC0,
    DecrementI = 0xC1,
    /// Operand: u32 local index.
    IncLocalI = 0xC2,
    /// Operand: u32 local index.
    DecLocalI = 0xC3,
    NegateI = 0xC4,
    AddI = 0xC5,
    SubtractI = 0xC6,
    MultiplyI = 0xC7,

    // === Short-form locals (index = opcode & 3) ===
    GetLocal0 = 0xD0,
    GetLocal1 = 0xD1,
    GetLocal2 = 0xD2,
    GetLocal3 = 0xD3,
    SetLocal0 = 0xD4,
    SetLocal1 = 0xD5,
    SetLocal2 = 0xD6,
    SetLocal3 = 0xD7,

    /// Operand: u32, ignored.
    BkptLine = 0xF2,
    /// Operand: u32, ignored.
    Timestamp = 0xF3,

    // === Custom opcodes ===
    /// Operand: u32 slot (1-based). Sets a slot without running the declared
    /// type's coercion.
    SetSlotNoCoerce = 0xFB,
    /// Operand: 8 bytes caching the resolved type. Written in place over
    /// Coerce after its first execution.
    CoerceEarly = 0xFC,
    /// Operand: u32 index into the effective scope chain (parent region
    /// first).
    GetScopeAtIndex = 0xFD,
    /// Operand: u32 multiname, padded to 8 bytes; rewrites itself to
    /// PushEarly on first execution.
    GetLexOnce = 0xFE,
    /// Operand: 8 bytes caching the resolved value. Written in place over
    /// GetLexOnce after its first execution.
    PushEarly = 0xFF,
}

impl Opcode {
    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_match_the_encoding_table() {
        assert_eq!(Opcode::PushByte as u8, 0x24);
        assert_eq!(Opcode::LookupSwitch as u8, 0x1B);
        assert_eq!(Opcode::Coerce as u8, 0x80);
        assert_eq!(Opcode::CoerceEarly as u8, 0xFC);
        assert_eq!(Opcode::GetLexOnce as u8, 0xFE);
        assert_eq!(Opcode::PushEarly as u8, 0xFF);
        assert_eq!(Opcode::SetLocal3 as u8, 0xD7);
    }

    #[test]
    fn round_trips_through_bytes() {
        for byte in 0..=0xFFu8 {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        // Gaps in the table stay unknown.
        assert!(Opcode::from_byte(0x00).is_none());
        assert!(Opcode::from_byte(0x09).is_none());
        assert!(Opcode::from_byte(0x67).is_none());
    }

    #[test]
    fn opcode_is_one_byte() {
        assert_eq!(std::mem::size_of::<Opcode>(), 1);
    }
}
