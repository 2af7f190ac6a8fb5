//! Typed runtime errors and the AS3 error-code surface.

use strum::{Display, EnumString, IntoStaticStr};

use crate::{heap::Heap, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, VmError>;

/// AS3 error categories surfaced by the interpreter.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the AS3 class name exactly
/// (e.g., `TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Root error class - matches any catchable error in handler checks.
    Error,

    TypeError,
    ReferenceError,
    ArgumentError,
    RangeError,
    VerifyError,
    EvalError,

    /// Unknown opcode or truncated operand record. Indicates a malformed
    /// method body; fatal to the invocation and never catchable.
    ParseException,
}

impl ErrorKind {
    /// Returns true when a handler declared for `handler_kind` catches `self`.
    ///
    /// `Error` catches every catchable kind; `ParseException` is caught by
    /// nothing.
    #[must_use]
    pub fn is_caught_by(self, handler_kind: Self) -> bool {
        if self == Self::ParseException {
            return false;
        }
        handler_kind == Self::Error || self == handler_kind
    }
}

// AS3 runtime error codes used by the interpreter. The numbering follows the
// Flash Player error-constant table.
pub(crate) const K_NOT_A_FUNCTION: u32 = 1006;
pub(crate) const K_CONSTRUCT_OF_NON_FUNCTION: u32 = 1007;
pub(crate) const K_CONVERT_NULL_TO_OBJECT: u32 = 1009;
pub(crate) const K_CONVERT_UNDEFINED_TO_OBJECT: u32 = 1010;
pub(crate) const K_CLASS_NOT_FOUND: u32 = 1014;
pub(crate) const K_DESCENDENTS: u32 = 1016;
pub(crate) const K_SCOPE_STACK_OVERFLOW: u32 = 1017;
pub(crate) const K_SCOPE_STACK_UNDERFLOW: u32 = 1018;
pub(crate) const K_GET_SCOPE_OBJECT_BOUNDS: u32 = 1019;
pub(crate) const K_STACK_OVERFLOW: u32 = 1023;
pub(crate) const K_STACK_UNDERFLOW: u32 = 1024;
pub(crate) const K_INVALID_REGISTER: u32 = 1025;
pub(crate) const K_CHECK_TYPE_FAILED: u32 = 1034;
pub(crate) const K_ASSIGN_TO_METHOD: u32 = 1037;
pub(crate) const K_INSTANCEOF_NON_OBJECT: u32 = 1040;
pub(crate) const K_ILLEGAL_DEFAULT_VALUE: u32 = 1041;
pub(crate) const K_CANNOT_CREATE_PROPERTY: u32 = 1056;
pub(crate) const K_WRONG_ARGUMENT_COUNT: u32 = 1063;
pub(crate) const K_UNDEFINED_VAR: u32 = 1065;
pub(crate) const K_SUPER_NOT_FOUND: u32 = 1070;
pub(crate) const K_WRITE_TO_READ_ONLY: u32 = 1074;
pub(crate) const K_FILTER: u32 = 1123;
pub(crate) const K_TYPE_APP_OF_NON_PARAM: u32 = 1127;
pub(crate) const K_INVALID_RANGE: u32 = 1506;

/// A raised runtime error.
///
/// Carries the AS3 error code and message, plus the thrown value for errors
/// raised by the `throw` opcode. The payload owns one reference; it is either
/// handed to a matching exception handler or must be released with
/// [`VmError::dispose`] by the final recipient.
#[derive(Debug)]
pub struct VmError {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
    payload: Option<Value>,
}

impl VmError {
    pub fn new(kind: ErrorKind, code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            payload: None,
        }
    }

    /// Wraps a value raised by the `throw` opcode. Takes ownership of one
    /// reference to `value`.
    pub fn thrown(value: Value, message: String) -> Self {
        Self {
            kind: ErrorKind::Error,
            code: 0,
            message,
            payload: Some(value),
        }
    }

    /// Removes and returns the thrown value, if any.
    pub fn take_payload(&mut self) -> Option<Value> {
        self.payload.take()
    }

    /// Releases the reference held by the thrown value, if any.
    pub fn dispose(mut self, heap: &mut Heap) {
        if let Some(v) = self.payload.take() {
            v.drop_with_heap(heap);
        }
    }

    pub fn type_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, code, message)
    }

    pub fn reference_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, code, message)
    }

    pub fn range_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, code, message)
    }

    pub fn argument_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgumentError, code, message)
    }

    pub fn verify_error(code: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VerifyError, code, message)
    }

    pub fn parse_exception(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseException, 0, message)
    }

    pub fn convert_null_to_object() -> Self {
        Self::type_error(
            K_CONVERT_NULL_TO_OBJECT,
            "Cannot access a property or method of a null object reference",
        )
    }

    pub fn convert_undefined_to_object() -> Self {
        Self::type_error(K_CONVERT_UNDEFINED_TO_OBJECT, "A term is undefined and has no properties")
    }

    pub fn undefined_var(name: &str) -> Self {
        Self::reference_error(K_UNDEFINED_VAR, format!("Variable {name} is not defined"))
    }

    pub fn check_type_failed(value_desc: &str, type_name: &str) -> Self {
        Self::type_error(
            K_CHECK_TYPE_FAILED,
            format!("Type Coercion failed: cannot convert {value_desc} to {type_name}"),
        )
    }

    pub fn not_a_function(name: &str) -> Self {
        Self::type_error(K_NOT_A_FUNCTION, format!("{name} is not a function"))
    }

    pub fn stack_underflow() -> Self {
        Self::verify_error(K_STACK_UNDERFLOW, "operand stack underflow")
    }

    pub fn stack_overflow() -> Self {
        Self::verify_error(K_STACK_OVERFLOW, "operand stack overflow")
    }

    pub fn invalid_range() -> Self {
        Self::range_error(K_INVALID_RANGE, "The specified range is invalid")
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code != 0 {
            write!(f, "{}: Error #{}: {}", self.kind, self.code, self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for VmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_catch_hierarchy() {
        assert!(ErrorKind::TypeError.is_caught_by(ErrorKind::Error));
        assert!(ErrorKind::TypeError.is_caught_by(ErrorKind::TypeError));
        assert!(!ErrorKind::TypeError.is_caught_by(ErrorKind::RangeError));
        assert!(!ErrorKind::ParseException.is_caught_by(ErrorKind::Error));
    }

    #[test]
    fn display_includes_code() {
        let err = VmError::convert_null_to_object();
        let text = err.to_string();
        assert!(text.starts_with("TypeError: Error #1009"));
    }
}
