//! chainfacade - a bitcoind-compatible read facade over partially trusted sources
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Chain Data
//! - [`blockchain`] - Header and block records over `bitcoin` types, merkle proofs
//! - [`transaction`] - Merged transaction records
//!
//! ## Collaborators
//! - [`persistence`] - Header/block repositories (SQLite, in-memory)
//! - [`cache`] - Namespaced LRU cache and the block/transaction cache decorators
//! - [`sources`] - Collaborator traits and the source registry
//! - [`electrum`] - Indexing-protocol client
//! - [`network`] - P2P block fetch client
//!
//! ## Query Engine
//! - [`resolver`] - Block and transaction resolution
//! - [`serializer`] - Daemon-shaped header replies
//! - [`facade`] - The query operations
//!
//! ## Surface & Utilities
//! - [`api`] - JSON-RPC server
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Chain Data
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Collaborators
// ============================================================================
pub mod cache;
pub mod electrum;
pub mod network;
pub mod persistence;
pub mod sources;

// ============================================================================
// Query Engine
// ============================================================================
pub mod facade;
pub mod resolver;
pub mod serializer;

// ============================================================================
// Surface & Utilities
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod error;

pub use error::{FacadeError, Result};
pub use facade::QueryFacade;
