//! Protocol-level vocabulary shared by the `quorum` request execution engine.
//!
//! The engine never encodes or decodes frames itself. It receives already decoded
//! [`Response`](frame::response::Response)s from the connection layer and reasons about
//! them in terms of the types defined here: consistency levels, server-side errors
//! and response kinds.

pub mod frame;

pub use crate::frame::response::error::{DbError, WriteType};
pub use crate::frame::response::CqlResponseKind;
pub use crate::frame::types::{Consistency, SerialConsistency};
