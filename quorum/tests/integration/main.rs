mod execution;
mod observers;
pub(crate) mod utils;
