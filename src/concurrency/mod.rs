//! Structured concurrency primitives shared by `Fork`, `Spawn`, and the
//! `TaskManager`.

mod cancel_token;

pub use cancel_token::{CancelScope, CancelToken};
