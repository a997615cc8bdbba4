//! Storage backends for association partitions.
//!
//! Each backend implements [`PartitionSource`](crate::partition::PartitionSource),
//! so the cursor walker and the search orchestrator work against any of them.
//!
//! # Implementations
//!
//! - [`BlockStore`] - chromosome/block/load-group tree, filtered after reading
//! - [`TableStore`] - one position-sorted table per dataset, filtered while reading
//! - [`CollectionStore`] - one in-memory collection per study, filtered while reading
//!
//! # Example
//!
//! ```no_run
//! use sumstatsr::block::BlockLayout;
//! use sumstatsr::partition::{PartitionSource, Scope};
//! use sumstatsr::storage::BlockStore;
//! use std::path::PathBuf;
//!
//! let store = BlockStore::new(PathBuf::from("./data/bychr"), BlockLayout::default());
//! let partitions = store.list_partitions(&Scope::all()).unwrap();
//! ```

mod block;
mod collection;
pub mod jsonl;
mod table;

pub use block::{BlockStore, RECORDS_FILE};
pub use collection::CollectionStore;
pub use table::{
    ChunkEntry, GENOMIC_CONTEXT_FILE, GenomicContextEntry, INDEX_FILE, SUMSTATS_FILE, TableIndex,
    TableStore,
};

use crate::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use tracing::debug;

pub const LOCK_FILE: &str = ".lock";

/// Exclusive write access to a store root.
///
/// Held as an advisory `flock` on `<root>/.lock`. The lock goes away with
/// the file handle, so a crashed loader never blocks the next one. The file
/// itself is left in place.
#[derive(Debug)]
pub struct WriteLock {
    file: File,
}

impl WriteLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{LOCK_EX, LOCK_NB, flock};

            // SAFETY: the descriptor is owned by `file` and open for the call.
            if unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) } != 0 {
                let e = std::io::Error::last_os_error();
                return Err(match e.kind() {
                    std::io::ErrorKind::WouldBlock => {
                        Error::Internal(format!("another load holds {}", path.display()))
                    }
                    _ => Error::Io(e),
                });
            }
        }

        debug!(path = %path.display(), "write lock acquired");
        Ok(Self { file })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{LOCK_UN, flock};

            // SAFETY: the descriptor is still owned by `self.file`.
            unsafe {
                flock(self.file.as_raw_fd(), LOCK_UN);
            }
        }
    }
}
