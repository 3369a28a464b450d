//! Request execution engine for CQL databases with tunable consistency.
//!
//! The engine turns a single logical request into attempts on cluster nodes:
//! - a [load balancing policy](policies::load_balancing) decides which nodes to try, and in which order,
//! - a [retry policy](policies::retry) decides what to do after an attempt fails,
//! - a [speculative execution policy](policies::speculative_execution) decides whether
//!   to start additional concurrent executions of idempotent statements,
//! - [observers](observability) are notified about the lifecycle of the request.
//!
//! Connections and frame encoding are out of scope: the engine uses connections of a
//! user-provided [`ConnectionPool`](network::ConnectionPool).
//!
//! # Example
//! ```rust
//! # use std::error::Error;
//! # use std::sync::Arc;
//! # async fn check_only_compiles(
//! #     pool: Arc<dyn quorum::network::ConnectionPool>,
//! #     peers: Vec<quorum::cluster::Peer>,
//! # ) -> Result<(), Box<dyn Error>> {
//! use quorum::{ExecutionProfile, SessionBuilder};
//! use quorum::statement::{Consistency, Statement};
//!
//! let session = SessionBuilder::new(pool)
//!     .known_peers(peers)
//!     .default_execution_profile_handle(
//!         ExecutionProfile::builder()
//!             .consistency(Consistency::Quorum)
//!             .build()
//!             .into_handle(),
//!     )
//!     .build()?;
//!
//! let response = session.execute(&Statement::new("SELECT * FROM ks.t")).await?;
//! println!("{:?}", response.response);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod client;
pub mod cluster;
pub mod errors;
pub mod network;
pub mod observability;
pub mod policies;
pub mod response;
pub mod statement;

pub(crate) mod utils;

#[cfg(test)]
pub(crate) use utils::test_utils;

pub use client::execution_profile::ExecutionProfile;
pub use client::session::Session;
pub use client::session_builder::SessionBuilder;
