//! The entry point of the engine: [`Session`](session::Session), its builder and
//! execution profiles, together with the request execution machinery behind them.

pub mod execution_profile;

mod request_execution;
mod request_handler;

pub mod session;

pub mod session_builder;
