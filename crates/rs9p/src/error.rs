//! Error type used throughout the crate.
//!
//! 9P2000.L reports failures as a plain POSIX errno carried in `Rlerror`.
//! [`Error`] is either such an errno (`Error::No`) or an I/O failure from the
//! transport, which callers should treat as fatal to the connection.

use std::fmt;
use std::io;

/// Common POSIX errno values, re-exported from `nix::libc` so this crate
/// does not need its own `libc` dependency.
pub mod errno {
    pub use nix::libc::{
        EACCES, EAGAIN, EBADF, ECONNREFUSED, EEXIST, EINTR, EINVAL, EIO, EISDIR, ELOOP, EMFILE,
        ENAMETOOLONG, ENOENT, ENOMEM, ENOSPC, ENOSYS, ENOTDIR, ENOTEMPTY, ENOTSUP as EOPNOTSUPP,
        EPERM, EPROTO, EROFS,
    };
}

/// The error type returned by fallible operations in this crate.
#[derive(Debug)]
pub enum Error {
    /// A POSIX errno to be reported to the client as `Rlerror`.
    No(i32),
    /// A transport- or allocation-level I/O failure.
    Io(io::Error),
}

impl Error {
    /// The errno that should be sent on the wire for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::No(n) => *n,
            Error::Io(e) => e.raw_os_error().unwrap_or(errno::EIO),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::No(n) => write!(f, "errno {}", n),
            Error::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::No(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Render an errno as its symbolic name, falling back to the raw number.
pub fn string(errno: i32) -> String {
    match errno {
        errno::EPERM => "EPERM".to_string(),
        errno::ENOENT => "ENOENT".to_string(),
        errno::EINTR => "EINTR".to_string(),
        errno::EIO => "EIO".to_string(),
        errno::EBADF => "EBADF".to_string(),
        errno::EAGAIN => "EAGAIN".to_string(),
        errno::ENOMEM => "ENOMEM".to_string(),
        errno::EACCES => "EACCES".to_string(),
        errno::EEXIST => "EEXIST".to_string(),
        errno::ENOTDIR => "ENOTDIR".to_string(),
        errno::EISDIR => "EISDIR".to_string(),
        errno::EINVAL => "EINVAL".to_string(),
        errno::ENOSPC => "ENOSPC".to_string(),
        errno::EROFS => "EROFS".to_string(),
        errno::ENOTEMPTY => "ENOTEMPTY".to_string(),
        errno::ENAMETOOLONG => "ENAMETOOLONG".to_string(),
        errno::ELOOP => "ELOOP".to_string(),
        errno::EMFILE => "EMFILE".to_string(),
        errno::EOPNOTSUPP => "EOPNOTSUPP".to_string(),
        errno::EPROTO => "EPROTO".to_string(),
        errno::ECONNREFUSED => "ECONNREFUSED".to_string(),
        n => format!("errno {}", n),
    }
}
