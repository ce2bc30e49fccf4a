//! # aton-core
//!
//! Core data model for the AtoN broadcast engine.
//!
//! This crate provides:
//! - Station and navigational-aid model types
//! - Coverage geometry and the pluggable coverage predicate
//! - Station and message-cache store traits with in-memory implementations
//! - TOML configuration loading
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the protocol codec and the router can be exercised without tokio.

pub mod config;
pub mod geometry;
pub mod model;
pub mod store;

pub use geometry::{BoundingBox, Circle, Coordinate, CoverageArea, Geometry, Polygon};
pub use model::*;
pub use store::{MemoryMessageStore, MemoryStationStore, MessageStore, StationStore, StoreError};
