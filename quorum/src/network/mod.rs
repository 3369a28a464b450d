//! Seams towards the connection layer.
//!
//! The engine neither opens sockets nor encodes frames. It obtains connections
//! from a [`ConnectionPool`] and sends statements through a [`Connection`],
//! which hands back already decoded responses.

mod connection;
mod connection_pool;

pub use connection::Connection;
pub use connection_pool::{ConnectionPool, PooledConnection};
