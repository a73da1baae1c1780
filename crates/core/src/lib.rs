//! Core types shared by the ingest crates.

pub mod exchange;

pub use exchange::*;
