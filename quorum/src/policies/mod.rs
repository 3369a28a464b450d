//! This module holds policies, which are entities that allow configuring
//! the driver's behaviour in various aspects. The common feature of all policies
//! is that users can implement a policy on their own (because they simply need
//! to implement a certain trait), allowing flexible customizability of the driver.
//!
//! This includes:
//! - [`load_balancing`]: which nodes a request is sent to, and in what order,
//! - [`retry`]: what to do after an attempt failed,
//! - [`speculative_execution`]: when to start additional concurrent executions.

pub mod load_balancing;
pub mod retry;
pub mod speculative_execution;
