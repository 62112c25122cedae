//! Error types for the `extfs` crate.
//!
//! Errors are split into domains (arguments, I/O, on-disk input, memory,
//! runtime), each with its own enum. The [`ExtError`] umbrella wraps all of
//! them so that fallible operations across module boundaries can propagate
//! with `?`.

use core::fmt::{Debug, Display, Formatter};

/// `BaseError` is a common trait implemented by every error type defined in `extfs`.
///
/// It is dependent on the [`Debug`] trait, which makes sense as we are dealing with errors.
pub trait BaseError: Debug {}

/// `CanFail` is a return type for functions that are allowed to fail, and don't need to return
/// anything.
pub type CanFail<E> = Result<(), E>;

/// Standard result type for fallible `extfs` operations.
pub type ExtResult<T> = Result<T, ExtError>;

/// `ArgumentError` covers invalid values handed to the library by a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgumentError {
    /// The argument value is not valid in this context.
    InvalidValue,

    /// The argument value falls outside the valid range.
    ValueOutOfBounds,

    /// The argument value is valid but not supported by this build.
    UnsupportedValue,
}

impl BaseError for ArgumentError {}

/// `IoError` covers failures of the underlying byte source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoError {
    /// Opening the byte source failed.
    OpenFailed,

    /// A positioned read did not complete.
    ReadFailed,

    /// Seeking to the requested offset failed.
    SeekFailed,
}

impl BaseError for IoError {}

/// `InputError` covers malformed on-disk data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputError {
    /// A structure signature did not match its expected value.
    SignatureMismatch,

    /// A structure could not be decoded from its on-disk bytes.
    InvalidData,

    /// Two copies of a structure that should agree do not.
    ValueMismatch,
}

impl BaseError for InputError {}

/// `MemoryError` covers allocation failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryError {
    /// Not enough memory to complete the operation.
    InsufficientMemory,
}

impl BaseError for MemoryError {}

/// `RuntimeError` covers conditions detected while interpreting an otherwise
/// well-formed volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// A value that should have been present is missing.
    ValueMissing,

    /// A value that may only be set once was already set.
    ValueAlreadySet,

    /// A decoded value falls outside its valid range.
    ValueOutOfBounds,

    /// A decoded value is valid on disk but not supported by this build.
    UnsupportedValue,

    /// The abort flag was raised while the operation was in progress.
    AbortRequested,
}

impl BaseError for RuntimeError {}

/// Umbrella error for the public API.
///
/// Every domain error converts into `ExtError` through [`From`], so internal
/// code returns the narrow domain type and callers see a single error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtError {
    Argument(ArgumentError),
    Io(IoError),
    Input(InputError),
    Memory(MemoryError),
    Runtime(RuntimeError),
}

impl BaseError for ExtError {}

impl From<ArgumentError> for ExtError {
    fn from(value: ArgumentError) -> Self {
        Self::Argument(value)
    }
}

impl From<IoError> for ExtError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<InputError> for ExtError {
    fn from(value: InputError) -> Self {
        Self::Input(value)
    }
}

impl From<MemoryError> for ExtError {
    fn from(value: MemoryError) -> Self {
        Self::Memory(value)
    }
}

impl From<RuntimeError> for ExtError {
    fn from(value: RuntimeError) -> Self {
        Self::Runtime(value)
    }
}

impl Display for ExtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Argument(err) => write!(f, "argument error: {err:?}"),
            Self::Io(err) => write!(f, "io error: {err:?}"),
            Self::Input(err) => write!(f, "input error: {err:?}"),
            Self::Memory(err) => write!(f, "memory error: {err:?}"),
            Self::Runtime(err) => write!(f, "runtime error: {err:?}"),
        }
    }
}

impl std::error::Error for ExtError {}

impl ExtError {
    /// Checks whether this error is an abort notification rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Runtime(RuntimeError::AbortRequested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_convert_into_umbrella() {
        let err: ExtError = InputError::SignatureMismatch.into();
        assert_eq!(err, ExtError::Input(InputError::SignatureMismatch));

        let err: ExtError = RuntimeError::AbortRequested.into();
        assert!(err.is_abort());
    }
}
