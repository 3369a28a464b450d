pub mod response;
pub mod types;

use thiserror::Error;

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    pub(crate) enum_name: &'static str,
    pub(crate) primitive: T,
}
