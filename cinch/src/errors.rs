use cinch_field::errors::FieldError;
use thiserror::Error;

use crate::schema::Handle;

/// Everything that can go wrong between schema declaration and trace
/// acceptance.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    /// A raw trace column that no declared input column matches.
    #[error("unknown column {0}")]
    UnknownColumn(String),

    /// A declared input column for which the raw trace has no values.
    #[error("missing column {0}")]
    MissingColumn(String),

    /// A value too wide for the column holding it.
    #[error("value {value} does not fit the {width}-bit column {column} at row {row}")]
    Overflow {
        column: String,
        row: usize,
        value: String,
        width: usize,
    },

    #[error("tried to invert zero")]
    NonInvertible,

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("conflicting definition of {0}")]
    ConflictingDefinition(String),

    #[error("cyclic assignment through {0}")]
    CyclicAssignment(String),

    #[error("constraint {handle} has degree {degree}, above the bound of {bound}")]
    DegreeExceeded {
        handle: Handle,
        degree: usize,
        bound: usize,
    },

    #[error("shift of {shift} in module {module} exceeds its declared spillage of {spillage}")]
    ShiftOutOfSpillage {
        module: String,
        shift: isize,
        spillage: usize,
    },

    /// A constraint failure promoted to an error by a caller that demanded
    /// acceptance.
    #[error("constraint {0} is unsatisfiable on the given trace")]
    Unsatisfiable(Handle),

    #[error("debug assertion {0} failed")]
    DebugAssertion(Handle),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<FieldError> for Error {
    fn from(e: FieldError) -> Self {
        match e {
            FieldError::NonInvertible => Error::NonInvertible,
            FieldError::OutOfRange | FieldError::BadLength { .. } => {
                Error::OutOfRange(e.to_string())
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Non-fatal diagnostics accumulated by the trace builder. The builder's
/// `strict` flag promotes them to hard errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// A raw column that matches no declared input column.
    UnknownColumn(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnknownColumn(name) => write!(f, "unknown column {name}"),
        }
    }
}

impl Warning {
    /// The error this warning becomes under `strict`.
    pub fn into_error(self) -> Error {
        match self {
            Warning::UnknownColumn(name) => Error::UnknownColumn(name),
        }
    }
}
