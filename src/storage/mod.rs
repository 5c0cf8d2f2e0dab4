//! Storage Layer
//!
//! SQLite-backed persistence for the memory engine.

pub mod database;
