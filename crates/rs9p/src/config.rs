//! Frozen configuration snapshot consumed by [`crate::server::Server`].
//!
//! Everything else the original `diod_conf.c` registry carries — listen
//! addresses, exports, the config file path, the log destination, the
//! readonly bitmask governing SIGHUP reload — belongs to the external
//! configuration-loading collaborator and has no place here. `Config` is
//! built once by that collaborator and handed to `Server::new` by value;
//! nothing inside this crate ever mutates it.

use bitflags::bitflags;

bitflags! {
    /// Mirrors `diod`'s `debuglevel` bitmask.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DebugFlags: u32 {
        #[doc = "Trace every Tmessage/Rmessage"]
        const TRACE_9P = 0x01;
        #[doc = "Trace auth decisions"]
        const AUTH     = 0x02;
    }
}

/// Ample room for `size[4] type[1] tag[2]` plus a typical request body.
const DEFAULT_MSIZE: u32 = 8192 + crate::fcall::IOHDRSZ;

#[derive(Clone, Debug)]
pub struct Config {
    /// Whether a credential must be presented and verified before attach.
    pub auth_required: bool,
    /// Map every uid to an unprivileged identity (unused by the core itself,
    /// surfaced to the backend).
    pub allsquash: bool,
    /// If set, requests presenting this uid bypass further squashing.
    pub runasuid: Option<u32>,
    /// Worker pool size.
    pub nwthreads: u32,
    /// Negotiated maximum message size ceiling.
    pub msize: u32,
    pub debuglevel: DebugFlags,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auth_required: true,
            allsquash: false,
            runasuid: None,
            nwthreads: 16,
            msize: DEFAULT_MSIZE,
            debuglevel: DebugFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_compiled_defaults() {
        let config = Config::default();
        assert!(config.auth_required);
        assert_eq!(config.nwthreads, 16);
    }
}
