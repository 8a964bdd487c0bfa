//! Shared utilities for gmna-ba

pub mod retry;

pub use retry::{Attempted, Backoff, RetryFailure, RetryPolicy};
