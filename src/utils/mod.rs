//! Shared utilities: process bootstrap, retry policies and background task
//! lifetime.

pub mod bootstrap;
pub mod retry;
pub mod task;
