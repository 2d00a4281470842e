//! Query compilation and the fetch/cache orchestration built on it.

pub mod compiler;
pub mod content;
pub mod controller;
pub mod error;
pub mod inflight;
pub mod pagination;
