//! Relation-aware tag cache layer for ORM query interception.
//!
//! See [`cache::CacheLayer`] for the host-facing surface.

pub mod cache;
pub mod config;
pub mod infra;
pub mod schema;
pub mod value;
