//! Synchronous backend interface.
//!
//! Mirrors the teacher's async `Filesystem` trait one-for-one in method
//! surface, but every handler is a plain blocking `fn` per the OS-thread
//! concurrency model of this crate: a worker thread calls straight into the
//! backend and is free to block on real I/O there. Unimplemented
//! operations default to `EOPNOTSUPP`, same posture as the source.

use crate::error::{errno::*, Error};
use crate::fcall::*;
use crate::fid::Fid;

type Result<T> = ::std::result::Result<T, Error>;

/// The per-operation handler table a filesystem server implements.
///
/// # FId management
/// The core owns the fid table ([`crate::fid::FidPool`]); `Self::Fid` is
/// only the backend's own private state for a fid (an open file handle, a
/// resolved path, …), stored in [`crate::fid::FidKind::Regular`].
pub trait Backend: Send + Sync {
    /// The backend's own private per-fid state, stored in the core's
    /// `FidKind::Regular` slot. `Default` gives the core a value to seed a
    /// freshly created fid with, before the backend has had a chance to
    /// populate it (mirrors `UnpfsFId`'s `#[derive(Default)]` in the
    /// teacher crate).
    type Fid: Send + Sync + Default;

    // 9P2000.L

    fn rstatfs(&self, _: &Fid<Self::Fid>) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rlopen(&self, _: &Fid<Self::Fid>, _flags: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rlcreate(
        &self,
        _: &Fid<Self::Fid>,
        _name: &str,
        _flags: u32,
        _mode: u32,
        _gid: u32,
    ) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rsymlink(&self, _: &Fid<Self::Fid>, _name: &str, _sym: &str, _gid: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rmknod(
        &self,
        _: &Fid<Self::Fid>,
        _name: &str,
        _mode: u32,
        _major: u32,
        _minor: u32,
        _gid: u32,
    ) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rrename(&self, _: &Fid<Self::Fid>, _: &Fid<Self::Fid>, _name: &str) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rreadlink(&self, _: &Fid<Self::Fid>) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rgetattr(&self, _: &Fid<Self::Fid>, _req_mask: GetAttrMask) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rsetattr(&self, _: &Fid<Self::Fid>, _valid: SetAttrMask, _stat: &SetAttr) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rxattrwalk(&self, _: &Fid<Self::Fid>, _new: &Fid<Self::Fid>, _name: &str) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rxattrcreate(
        &self,
        _: &Fid<Self::Fid>,
        _name: &str,
        _attr_size: u64,
        _flags: u32,
    ) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rreaddir(&self, _: &Fid<Self::Fid>, _offset: u64, _count: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rfsync(&self, _: &Fid<Self::Fid>) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rlock(&self, _: &Fid<Self::Fid>, _lock: &Flock) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rgetlock(&self, _: &Fid<Self::Fid>, _lock: &Getlock) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rlink(&self, _: &Fid<Self::Fid>, _: &Fid<Self::Fid>, _name: &str) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rmkdir(&self, _: &Fid<Self::Fid>, _name: &str, _mode: u32, _gid: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rrenameat(
        &self,
        _: &Fid<Self::Fid>,
        _oldname: &str,
        _: &Fid<Self::Fid>,
        _newname: &str,
    ) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn runlinkat(&self, _: &Fid<Self::Fid>, _name: &str, _flags: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    // Attach. Auth itself is handled by the core (see `crate::auth`); by the
    // time `rattach` is called, `checkauth` has already allowed the attach.
    fn rattach(
        &self,
        _fid: &Fid<Self::Fid>,
        _afid: Option<&Fid<Self::Fid>>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    // 9P2000

    fn rwalk(&self, _: &Fid<Self::Fid>, _new: &Fid<Self::Fid>, _wnames: &[String]) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rread(&self, _: &Fid<Self::Fid>, _offset: u64, _count: u32) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rwrite(&self, _: &Fid<Self::Fid>, _offset: u64, _data: &Data) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rclunk(&self, _: &Fid<Self::Fid>) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    fn rremove(&self, _: &Fid<Self::Fid>) -> Result<FCall> {
        Err(Error::No(EOPNOTSUPP))
    }

    /// Negotiate `msize`/version. The default accepts 9P2000.L verbatim and
    /// reports `VERSION_UNKNOWN` for anything else, same as the source.
    fn rversion(&self, msize: u32, ver: &str) -> Result<FCall> {
        Ok(FCall::RVersion {
            msize,
            version: match ver {
                P92000L => ver.to_owned(),
                _ => VERSION_UNKNOWN.to_owned(),
            },
        })
    }

    /// Abort whatever operation is in flight on `fid` (if any) so that the
    /// request the server is flushing can complete promptly with `EINTR`.
    /// Called with no core lock held; must not block indefinitely.
    fn flush(&self, _fid: Option<&Fid<Self::Fid>>) {}

    /// Notification that a connection's transport is gone and its fid pool
    /// has been destroyed. Useful for backends that track per-connection
    /// state of their own.
    fn connection_closed(&self) {}
}
