//! The tagged runtime value and its boxing factories.

use crate::{
    class::ClassId,
    heap::{Heap, HeapData, HeapId},
    pool::{ConstantPool, StringId},
};

/// A boxed AVM2 Number.
///
/// Carries the `is_float` flag distinguishing integral doubles (produced by
/// the integer fast paths) from true floating-point results. The flag decides
/// whether a Number qualifies for 64-bit integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number {
    pub value: f64,
    pub is_float: bool,
}

impl Number {
    /// A floating-point Number; never re-enters the integer fast path.
    pub fn float(value: f64) -> Self {
        Self { value, is_float: true }
    }

    /// An integral Number boxed from 64-bit integer arithmetic.
    pub fn integral(value: i64) -> Self {
        Self {
            value: value as f64,
            is_float: false,
        }
    }
}

/// Primary value type representing AVM2 values at runtime.
///
/// Small immediate values (Int, UInt, Number, Bool, Null, Undefined) are
/// stored inline; heap-allocated values (strings, arrays, objects, functions,
/// namespaces) live in the arena and are referenced via `Ref(HeapId)`. String
/// literals from the constant pool stay interned as `InternString`. Classes
/// are table-owned and never reference counted, so `Class` is immediate too.
///
/// NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` so the
/// arena refcount tracks every duplicated `Ref`; a direct `.clone()` would
/// leak a reference.
#[derive(Debug)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Number(Number),
    /// An interned string literal referencing the constant pool.
    InternString(StringId),
    /// A class object. Classes live in the class table for the lifetime of
    /// the context, so no ownership is tracked.
    Class(ClassId),
    /// Reference to an arena entry (string, namespace, qname, array, object,
    /// or function).
    Ref(HeapId),
}

impl Value {
    // --- boxing factories -------------------------------------------------

    /// Boxes a native 32-bit signed integer.
    pub fn abstract_i(v: i32) -> Self {
        Self::Int(v)
    }

    /// Boxes a native 32-bit unsigned integer.
    pub fn abstract_ui(v: u32) -> Self {
        Self::UInt(v)
    }

    /// Boxes a double as a floating-point Number.
    pub fn abstract_d(v: f64) -> Self {
        Self::Number(Number::float(v))
    }

    /// Boxes a 64-bit integer as an integral Number, keeping it eligible for
    /// the integer fast paths.
    pub fn abstract_di(v: i64) -> Self {
        Self::Number(Number::integral(v))
    }

    /// Boxes a native boolean.
    pub fn abstract_b(v: bool) -> Self {
        Self::Bool(v)
    }

    /// Boxes a runtime string on the heap.
    pub fn abstract_s(heap: &mut Heap, s: impl Into<String>) -> Self {
        Self::Ref(heap.alloc_string(s))
    }

    // --- predicates -------------------------------------------------------

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_uinteger(&self) -> bool {
        matches!(self, Self::UInt(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// True for Integer, UInteger, and integral (non-float) Number values:
    /// the inputs accepted by the 64-bit integer arithmetic fast paths.
    pub fn is_integral(&self) -> bool {
        match self {
            Self::Int(_) | Self::UInt(_) => true,
            Self::Number(n) => !n.is_float,
            _ => false,
        }
    }

    pub fn is_string(&self, heap: &Heap) -> bool {
        match self {
            Self::InternString(_) => true,
            Self::Ref(id) => matches!(heap.get(*id), HeapData::Str(_)),
            _ => false,
        }
    }

    pub fn is_array(&self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(*id), HeapData::Array(_)))
    }

    pub fn is_function(&self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(*id), HeapData::Function(_)))
    }

    pub fn is_namespace(&self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(*id), HeapData::Namespace(_)))
    }

    /// Returns the heap id for `Ref` values.
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    // --- ownership --------------------------------------------------------

    /// Duplicates this value, incrementing the arena refcount for `Ref`s.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.copy_tag()
    }

    /// Releases the reference held by this value.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Bitwise copy of the tag without touching refcounts. Callers must pair
    /// this with an explicit `inc_ref` before the copy becomes reachable.
    pub(crate) fn copy_tag(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::UInt(u) => Self::UInt(*u),
            Self::Number(n) => Self::Number(*n),
            Self::InternString(s) => Self::InternString(*s),
            Self::Class(c) => Self::Class(*c),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    // --- debugging --------------------------------------------------------

    /// Human-readable rendering for diagnostics. Unlike `to_avm_string` this
    /// never allocates on the heap and annotates the tag.
    pub fn to_debug_string(&self, heap: &Heap, pool: &ConstantPool) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => format!("{i}i"),
            Self::UInt(u) => format!("{u}u"),
            Self::Number(n) => {
                if n.is_float {
                    format!("{}d", n.value)
                } else {
                    format!("{}di", n.value)
                }
            }
            Self::InternString(id) => format!("{:?}", pool.string(*id)),
            Self::Class(id) => format!("<class #{}>", id.index()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => format!("{s:?}"),
                HeapData::Namespace(ns) => format!("<namespace {}>", ns.uri),
                HeapData::QName(q) => format!("<qname {}>", q.local),
                HeapData::Array(a) => format!("<array len={}>", a.len()),
                HeapData::Object(_) => "<object>".to_string(),
                HeapData::Function(_) => "<function>".to_string(),
            },
        }
    }
}
