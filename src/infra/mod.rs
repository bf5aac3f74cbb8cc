//! Infrastructure adapters and runtime bootstrap.

pub mod backends;
pub mod error;
pub mod http;
pub mod kafka;
mod lock;
pub mod memory;
pub mod redis;
pub mod telemetry;
