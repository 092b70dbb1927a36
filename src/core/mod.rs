//! Block-space core
//!
//! - [`error`] - Error types for block-space operations
//! - [`config`] - Geometry constants and TOML configuration
//! - [`allocator`] - Block id codec, portions, recovery bitmap and allocators
//! - [`eviction`] - Cache eviction policies
//! - [`buffer_pool`] - In-memory block buffers reclaimed through eviction

pub mod allocator;
pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod eviction;
