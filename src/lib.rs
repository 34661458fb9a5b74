//! # cellstore
//!
//! Per-column-family LSM storage core with:
//! - Block-structured sorted files with a block index, bloom filters and
//!   per-block compression
//! - A shared, priority-aware LRU block cache with background eviction
//! - A two-generation concurrent memtable with MVCC-filtered scanners
//! - Flush, minor/major compaction and split point selection
//! - Merged scans honouring versions, deletes, TTL and time ranges
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Region layer (external)                     │
//! │              put / delete / scan / flush / compact           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Store                                │
//! │        (MVCC, file list swap, flush/compaction locks)        │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!  ┌───────────┐         ┌─────────────┐        ┌─────────────┐
//!  │    WAL    │         │  MemTable   │        │ Store Files │
//!  │ (external)│         │ (SkipMaps)  │        │ (sorted +   │
//!  └───────────┘         └─────────────┘        │  bloom)     │
//!                                               └──────┬──────┘
//!                                                      │
//!                                                      ▼
//!                                               ┌─────────────┐
//!                                               │ Block Cache │
//!                                               └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod cell;

pub mod bloom;
pub mod cache;
pub mod sfile;
pub mod storefile;
pub mod memtable;
pub mod mvcc;
pub mod wal;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cell::{Cell, CellType};
pub use config::{CacheConfig, FamilyConfig, StoreConfig};
pub use error::{CellStoreError, Result};
pub use store::{Scan, Store, StoreScanner};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of cellstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
