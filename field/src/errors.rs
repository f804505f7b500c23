use thiserror::Error;

/// Failures of field-element operations that are observable on data, as
/// opposed to programming errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Inversion of the zero element.
    #[error("tried to invert zero")]
    NonInvertible,

    /// A decoded integer was not a canonical field element.
    #[error("decoded value is not below the field modulus")]
    OutOfRange,

    /// An encoded field element had the wrong byte length.
    #[error("encoded field element must be exactly {expected} bytes, got {got}")]
    BadLength { expected: usize, got: usize },
}
