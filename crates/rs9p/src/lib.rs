#![forbid(unsafe_code)]
//! A thread-per-connection 9P2000.L file server core.
//!
//! This crate provides the connection runtime and `afid` authentication
//! state machine of a 9P2000.L server: reading and framing requests off a
//! byte-stream [`transport::Transport`], routing them to a fixed-size
//! worker pool, and dispatching each to an opaque [`backend::Backend`]
//! implementation. It does not itself read or write any files — a backend
//! supplies that.
//!
//! # Overview
//!
//! The 9P protocol was originally developed for the Plan 9 distributed
//! operating system. 9P2000.L is an extended variant that adds
//! Linux-specific features like proper permission handling, symbolic
//! links, and other POSIX semantics.
//!
//! # Getting started
//!
//! To stand up a 9P server:
//!
//! 1. Implement [`backend::Backend`] for your filesystem type, with an
//!    associated `Fid` type holding whatever per-fid state your backend
//!    needs (or `()` if it needs none).
//! 2. Build a [`config::Config`] and a [`auth::CredentialVerifier`].
//! 3. Call [`server::Server::new`], then [`server::Server::listen`].
//!
//! # Example
//!
//! ```no_run
//! use rs9p::{
//!     auth::CredentialVerifier,
//!     backend::Backend,
//!     config::Config,
//!     error::Error,
//!     fcall::{FCall, QId, QIdType},
//!     fid::Fid,
//!     server::Server,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct MyFs;
//!
//! impl Backend for MyFs {
//!     type Fid = ();
//!
//!     fn rattach(
//!         &self,
//!         _fid: &Fid<Self::Fid>,
//!         _afid: Option<&Fid<Self::Fid>>,
//!         _uname: &str,
//!         _aname: &str,
//!         _n_uname: u32,
//!     ) -> Result<FCall, Error> {
//!         Ok(FCall::RAttach {
//!             qid: QId { typ: QIdType::DIR, version: 0, path: 0 },
//!         })
//!     }
//!     // ...implement the operations your backend supports; the rest
//!     // default to `EOPNOTSUPP`.
//! }
//!
//! struct NoAuth;
//! impl CredentialVerifier for NoAuth {
//!     fn verify(&self, _blob: &[u8]) -> Result<u32, Error> {
//!         Err(Error::No(rs9p::errno::EPERM))
//!     }
//! }
//!
//! fn main() -> rs9p::Result<()> {
//!     let srv = Server::new(Config::default(), MyFs, Arc::new(NoAuth));
//!     srv.listen("tcp!127.0.0.1!564")
//! }
//! ```
//!
//! # Protocol details
//!
//! ## Message flow
//!
//! 1. **Version negotiation**: client sends `Tversion`, server responds
//!    with `Rversion`.
//! 2. **Authentication** (optional): `Tauth`/`Twrite`/`Rwrite` exchange
//!    against the [`auth::CredentialVerifier`].
//! 3. **Attach**: client attaches to the filesystem root with `Tattach`.
//! 4. **Operations**: client performs file operations (`walk`, `open`,
//!    `read`, `write`, etc.), dispatched to the [`backend::Backend`].
//! 5. **Cleanup**: client clunks fids with `Tclunk` to release resources.
//!
//! ## Fid management
//!
//! A "fid" (file identifier) is a 32-bit handle used by the client to
//! reference a file or directory. The server tracks the mapping between
//! fids and filesystem objects in a per-connection [`fid::FidPool`].
//!
//! **Important invariants:**
//! - Each fid is unique per connection.
//! - Fids persist across operations until explicitly clunked.
//! - Walking to a new fid creates a new fid; the old one remains valid.
//! - After `Tclunk`, the fid is invalid and removed from the pool.
//!
//! # Error handling
//!
//! Return errors using [`error::Error`]; the core converts these to
//! `Rlerror` messages carrying the wrapped errno. Common values:
//! - `ENOENT` - file not found
//! - `EACCES` / `EPERM` - permission denied
//! - `EISDIR` - is a directory (when a file was expected)
//! - `ENOTDIR` - not a directory (when a directory was expected)
//! - `EBADF` - bad file descriptor (invalid fid)
//!
//! # Transport
//!
//! [`server::Server::listen`] accepts:
//! - **TCP**: `"tcp!host!port"` (e.g. `"tcp!0.0.0.0!564"`)
//! - **Unix domain sockets**: `"unix!path!suffix"` (e.g. `"unix!/tmp/sock!0"`)
//!
//! Any other byte-stream source can be wrapped directly as a
//! [`transport::Transport`] and handed to [`server::Server::add_connection`].
//!
//! # Concurrency model
//!
//! One dedicated reader thread per connection, and a fixed-size worker
//! pool per server (`Config::nwthreads`) servicing a shared pending-request
//! queue. See [`server`] and [`conn`] for the lock discipline.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`) and relies on
//! Rust's type system and `std::sync` primitives for memory and thread
//! safety.
pub mod auth;
pub mod backend;
pub mod config;
pub mod conn;
pub mod error;
pub mod fcall;
pub mod fid;
pub mod request;
pub mod serialize;
pub mod server;
pub mod transport;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::error::errno;
pub use crate::error::string as errstr;
pub use crate::fcall::*;
pub use crate::utils::Result;
