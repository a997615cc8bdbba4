//! Partitioned GWAS/eQTL summary statistics store with resumable,
//! paginated association search.

pub mod block;
pub mod config;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod loader;
pub mod metadata;
pub mod partition;
pub mod search;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use search::{AssociationSearch, SearchConfig, SearchParams};
