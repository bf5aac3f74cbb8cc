//! Application services: ingestion, retrieval and the relay loop, wired to
//! broker and cache adapters through the traits in [`ports`].

pub mod error;
pub mod ingest;
pub mod ports;
pub mod relay;
pub mod retrieve;
