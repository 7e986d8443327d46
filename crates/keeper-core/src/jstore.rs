//! Locked JSON document storage.
//!
//! The membership document lives in a JSON file on a filesystem shared
//! by every agent container. Access goes through an exclusive advisory
//! lock taken immediately after opening and held until the handle is
//! dropped, so one open handle equals one critical section.
//!
//! The lock discipline is only as strong as the filesystem underneath:
//! a local filesystem or a POSIX-correct network filesystem gives
//! cross-process exclusion, nothing more. This is an operating
//! constraint of the deployment, not something this module can verify.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use keeper_proto::error::KeeperResult;
use keeper_proto::node::ClusterMetaDoc;

/// How a document handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Load only. The file must already exist.
    Read,
    /// Load and dump. The file is created if absent.
    ReadWrite,
}

/// A JSON file held open under an exclusive advisory lock.
///
/// Even read-only opens take the exclusive lock: readers must never
/// observe a half-written document, and writers re-derive everything
/// from a fresh load anyway, so there is nothing to gain from shared
/// locks here.
pub struct LockedJsonFile {
    file: File,
    path: PathBuf,
}

impl LockedJsonFile {
    /// Open `path` and block until the exclusive lock is acquired.
    ///
    /// No timeout is imposed; every holder releases promptly (the
    /// critical section is one read-check-maybe-write cycle), so
    /// unbounded waiting is accepted by policy.
    pub fn open(path: &Path, mode: OpenMode) -> KeeperResult<Self> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };
        file.lock_exclusive()?;
        debug!("locked {} ({:?})", path.display(), mode);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Parse the file as JSON, returning `default` when it is empty.
    ///
    /// An empty file is the normal state of a freshly created document
    /// and must not be a parse error.
    pub fn load<T: DeserializeOwned>(&mut self, default: T) -> KeeperResult<T> {
        let mut buf = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut buf)?;
        if buf.trim().is_empty() {
            return Ok(default);
        }
        Ok(serde_json::from_str(&buf)?)
    }

    /// Truncate the file, write `value` as JSON, and fsync.
    ///
    /// Truncation first: a shorter document must never leave trailing
    /// bytes from the previous content behind.
    pub fn dump<T: Serialize>(&mut self, value: &T) -> KeeperResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        serde_json::to_writer(&mut self.file, value)?;
        self.file.sync_all()?;
        debug!("wrote {}", self.path.display());
        Ok(())
    }
}

impl Drop for LockedJsonFile {
    fn drop(&mut self) {
        // The OS drops the lock with the fd anyway; the explicit
        // unlock keeps the release point obvious.
        let _ = self.file.unlock();
    }
}

/// Access to the shared membership document.
///
/// One `open` call corresponds to one lock acquisition; the returned
/// handle holds the lock until dropped. The reconciler only talks to
/// this trait, so tests can swap the file lock for an in-process
/// mutex without touching the algorithm.
pub trait ClusterMeta {
    fn open(&self, mode: OpenMode) -> KeeperResult<Box<dyn MetaHandle + '_>>;
}

/// A locked view of the membership document.
pub trait MetaHandle {
    /// Load the document; an empty backing store loads as the empty
    /// document.
    fn load(&mut self) -> KeeperResult<ClusterMetaDoc>;
    /// Replace the document.
    fn dump(&mut self, doc: &ClusterMetaDoc) -> KeeperResult<()>;
}

/// The production, file-backed membership document.
pub struct JsonFileMeta {
    path: PathBuf,
}

impl JsonFileMeta {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClusterMeta for JsonFileMeta {
    fn open(&self, mode: OpenMode) -> KeeperResult<Box<dyn MetaHandle + '_>> {
        let inner = LockedJsonFile::open(&self.path, mode)?;
        Ok(Box::new(JsonFileHandle { inner }))
    }
}

struct JsonFileHandle {
    inner: LockedJsonFile,
}

impl MetaHandle for JsonFileHandle {
    fn load(&mut self) -> KeeperResult<ClusterMetaDoc> {
        self.inner.load(ClusterMetaDoc::default())
    }

    fn dump(&mut self, doc: &ClusterMetaDoc) -> KeeperResult<()> {
        self.inner.dump(doc)
    }
}

/// In-memory membership document for single-process tests.
///
/// A `Mutex` stands in for the advisory file lock; holding the handle
/// holds the guard, so the locking structure of the algorithm under
/// test is unchanged.
#[derive(Debug, Default)]
pub struct MemoryMeta {
    doc: Mutex<ClusterMetaDoc>,
}

impl MemoryMeta {
    pub fn new(doc: ClusterMetaDoc) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    /// Copy out the current document (for assertions).
    pub fn snapshot(&self) -> ClusterMetaDoc {
        self.doc.lock().unwrap().clone()
    }
}

impl ClusterMeta for MemoryMeta {
    fn open(&self, _mode: OpenMode) -> KeeperResult<Box<dyn MetaHandle + '_>> {
        Ok(Box::new(MemoryHandle {
            guard: self.doc.lock().unwrap(),
        }))
    }
}

struct MemoryHandle<'a> {
    guard: MutexGuard<'a, ClusterMetaDoc>,
}

impl MetaHandle for MemoryHandle<'_> {
    fn load(&mut self) -> KeeperResult<ClusterMetaDoc> {
        Ok(self.guard.clone())
    }

    fn dump(&mut self, doc: &ClusterMetaDoc) -> KeeperResult<()> {
        *self.guard = doc.clone();
        Ok(())
    }
}
