//! In-memory inode table backing the [`crate::MemFs`] backend.
//!
//! Every object the server hands out is addressed by the `path` field of its
//! `QId` — this store treats that field as an inode number and never keeps
//! per-fid state of its own, since the core resets a fid's backend-private
//! slot to `Default::default()` on every walk (see `rs9p::server`'s
//! `dispatch_to_backend`). A fid's current object is always recovered from
//! `fid.qid().path`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rs9p::fcall::Time;

pub const ROOT_INO: u64 = 0;

const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;

pub enum Kind {
    Dir(BTreeMap<String, u64>),
    File(Vec<u8>),
}

pub struct Inode {
    pub parent: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: Kind,
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Dir(_))
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            Kind::File(data) => data.len() as u64,
            Kind::Dir(children) => children.len() as u64,
        }
    }

    pub fn stat(&self) -> rs9p::fcall::Stat {
        let size = self.size();
        rs9p::fcall::Stat {
            mode: self.mode | if self.is_dir() { S_IFDIR } else { S_IFREG },
            uid: self.uid,
            gid: self.gid,
            nlink: 1,
            rdev: 0,
            size,
            blksize: 4096,
            blocks: size.div_ceil(512),
            atime: systime_to_proto(self.atime),
            mtime: systime_to_proto(self.mtime),
            ctime: systime_to_proto(self.ctime),
        }
    }
}

pub fn systime_to_proto(t: SystemTime) -> Time {
    let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    Time {
        sec: d.as_secs(),
        nsec: d.subsec_nanos() as u64,
    }
}

pub fn proto_to_systime(t: Time) -> SystemTime {
    UNIX_EPOCH + Duration::new(t.sec, t.nsec as u32)
}

/// The whole filesystem tree, guarded by a single lock. A demo backend has no
/// need for finer-grained locking than this.
pub struct Store {
    pub inodes: Mutex<BTreeMap<u64, Inode>>,
    next_ino: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        let mut inodes = BTreeMap::new();
        let now = SystemTime::now();
        inodes.insert(
            ROOT_INO,
            Inode {
                parent: ROOT_INO,
                mode: 0o755,
                uid: 0,
                gid: 0,
                atime: now,
                mtime: now,
                ctime: now,
                kind: Kind::Dir(BTreeMap::new()),
            },
        );
        Store {
            inodes: Mutex::new(inodes),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
