//! The `afid` authentication handshake.
//!
//! Ported from `diod_auth.c`'s munge-based scheme, generalized to an opaque
//! [`CredentialVerifier`] so other credential formats can be plugged in
//! without touching the state machine (see the FIXME in the source about
//! multi-method negotiation — still unaddressed here, the wire form still
//! carries a single method).

use std::sync::Mutex;

use crate::error::{errno::*, Error};
use crate::fid::Fid;

/// Maps a presented credential blob to the uid it authenticates, or fails.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, blob: &[u8]) -> Result<u32, Error>;
}

/// State carried in an auth-fid's `aux` slot.
#[derive(Debug, Clone)]
pub enum AuthState {
    Unverified { buf: Vec<u8> },
    Verified { uid: u32 },
}

impl AuthState {
    pub fn new() -> Self {
        AuthState::Unverified { buf: Vec::new() }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, AuthState::Verified { .. })
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of `startauth`.
pub enum StartAuth {
    /// Proceed with the exchange; the reply qid is the 9P auth-qid.
    Proceed,
    /// Auth is disabled; the caller should answer `Tauth` with "not required".
    NotRequired,
}

/// `startauth(afid, aname) -> {Proceed, NotRequired}`.
///
/// Allocating the fresh `AuthState` itself is the caller's job (it owns the
/// fid), since it needs the rest of the fid's fields (id, user, aname) to
/// construct the `Fid` in the first place.
pub fn startauth(auth_required: bool) -> StartAuth {
    if auth_required {
        StartAuth::Proceed
    } else {
        StartAuth::NotRequired
    }
}

/// `auth_write(afid, offset, data) -> bytes_written`.
///
/// `count == 0` is treated as a no-op per the design notes (unspecified in
/// the source): it returns `Ok(0)` without touching `state` regardless of
/// offset or prior verification.
pub fn auth_write(
    state: &mut AuthState,
    verifier: &dyn CredentialVerifier,
    offset: u64,
    data: &[u8],
    want_uid: u32,
) -> Result<u32, Error> {
    if data.is_empty() {
        return Ok(0);
    }

    let buf = match state {
        AuthState::Verified { .. } => return Err(Error::No(EIO)),
        AuthState::Unverified { buf } => buf,
    };

    if offset as usize != buf.len() {
        return Err(Error::No(EIO));
    }

    buf.extend_from_slice(data);

    // The credential scheme is self-delimiting, so re-verifying after every
    // accepted append is safe: an incomplete blob simply fails again.
    if let Ok(uid) = verifier.verify(buf) {
        if uid == want_uid {
            *state = AuthState::Verified { uid };
        }
    }

    Ok(data.len() as u32)
}

/// `auth_read(afid, offset, count) -> 0`. This scheme never produces a
/// payload on the auth-fid's read side.
pub fn auth_read() -> u32 {
    0
}

/// `checkauth(fid, afid, aname)`, called from the `Tattach` handler.
///
/// Implements the full decision table: returns `Ok(Some(uid))` when the
/// attach should record a new `authuser` on the connection, `Ok(None)` when
/// it should proceed without changing it, and `Err(EPERM)` when the attach
/// must be denied.
pub fn checkauth<A>(
    fid_uid: u32,
    afid: Option<&Fid<A>>,
    auth_required: bool,
    prior_authuser: Option<u32>,
) -> Result<Option<u32>, Error> {
    match afid {
        None => {
            if !auth_required {
                return Ok(None);
            }
            match prior_authuser {
                None => Err(Error::No(EPERM)),
                Some(0) => Ok(None),
                Some(uid) if uid == fid_uid => Ok(None),
                Some(_) => Err(Error::No(EPERM)),
            }
        }
        Some(afid) => {
            let guard = afid
                .as_auth()
                .expect("checkauth called with a non-auth afid")
                .lock()
                .unwrap();
            match &*guard {
                AuthState::Unverified { .. } => Err(Error::No(EPERM)),
                AuthState::Verified { uid } if *uid == fid_uid => Ok(Some(*uid)),
                AuthState::Verified { .. } => Err(Error::No(EPERM)),
            }
        }
    }
}

/// `auth_clunk(afid) -> Ok`. The `AuthState` itself is torn down simply by
/// dropping the fid; this exists as a named hook for symmetry with the
/// other three handlers and as a place to log the event.
pub fn auth_clunk(_state: &Mutex<AuthState>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::{QId, QIdType};
    use crate::fid::User;

    struct FixedVerifier(u32);
    impl CredentialVerifier for FixedVerifier {
        fn verify(&self, blob: &[u8]) -> Result<u32, Error> {
            if blob == b"valid" {
                Ok(self.0)
            } else {
                Err(Error::No(EIO))
            }
        }
    }

    fn auth_qid() -> QId {
        QId {
            typ: QIdType::AUTH,
            version: 0,
            path: 0,
        }
    }

    #[test]
    fn write_at_wrong_offset_is_eio_and_state_unchanged() {
        let mut state = AuthState::new();
        let verifier = FixedVerifier(1000);
        let err = auth_write(&mut state, &verifier, 5, b"xxx", 1000).unwrap_err();
        assert_eq!(err.errno(), EIO);
        assert!(matches!(state, AuthState::Unverified { ref buf } if buf.is_empty()));

        // A corrected write at offset 0 still works afterwards.
        let n = auth_write(&mut state, &verifier, 0, b"valid", 1000).unwrap();
        assert_eq!(n, 5);
        assert!(state.is_verified());
    }

    #[test]
    fn write_after_verified_is_eio() {
        let mut state = AuthState::Verified { uid: 1000 };
        let verifier = FixedVerifier(1000);
        let err = auth_write(&mut state, &verifier, 0, b"valid", 1000).unwrap_err();
        assert_eq!(err.errno(), EIO);
    }

    #[test]
    fn uid_mismatch_leaves_state_unverified() {
        let mut state = AuthState::new();
        let verifier = FixedVerifier(1001);
        let n = auth_write(&mut state, &verifier, 0, b"valid", 1000).unwrap();
        assert_eq!(n, 5);
        assert!(!state.is_verified());
    }

    #[test]
    fn zero_count_write_is_noop() {
        let mut state = AuthState::new();
        let verifier = FixedVerifier(1000);
        let n = auth_write(&mut state, &verifier, 0, b"", 1000).unwrap();
        assert_eq!(n, 0);
        assert!(matches!(state, AuthState::Unverified { ref buf } if buf.is_empty()));
    }

    fn fid_with_auth(state: AuthState) -> Fid<()> {
        let mut fid = Fid::auth(2, User::new("alice", 1000, 1000), "/", auth_qid());
        if let Some(m) = fid.as_auth() {
            *m.lock().unwrap() = state;
        }
        fid
    }

    #[test]
    fn checkauth_table_no_afid_auth_not_required() {
        assert!(checkauth::<()>(1000, None, false, None).unwrap().is_none());
    }

    #[test]
    fn checkauth_table_no_afid_no_prior_state() {
        let err = checkauth::<()>(1000, None, true, None).unwrap_err();
        assert_eq!(err.errno(), EPERM);
    }

    #[test]
    fn checkauth_table_no_afid_root_handoff() {
        assert!(checkauth::<()>(1000, None, true, Some(0)).unwrap().is_none());
    }

    #[test]
    fn checkauth_table_no_afid_same_user_secondary_attach() {
        assert!(checkauth::<()>(1000, None, true, Some(1000))
            .unwrap()
            .is_none());
    }

    #[test]
    fn checkauth_table_no_afid_different_user_denied() {
        let err = checkauth::<()>(1000, None, true, Some(1001)).unwrap_err();
        assert_eq!(err.errno(), EPERM);
    }

    #[test]
    fn checkauth_table_unverified_afid_denied() {
        let fid = fid_with_auth(AuthState::new());
        let err = checkauth(1000, Some(&fid), true, None).unwrap_err();
        assert_eq!(err.errno(), EPERM);
    }

    #[test]
    fn checkauth_table_verified_afid_uid_mismatch_denied() {
        let fid = fid_with_auth(AuthState::Verified { uid: 1001 });
        let err = checkauth(1000, Some(&fid), true, None).unwrap_err();
        assert_eq!(err.errno(), EPERM);
    }

    #[test]
    fn checkauth_table_verified_afid_uid_match_allowed_and_records_authuser() {
        let fid = fid_with_auth(AuthState::Verified { uid: 1000 });
        let recorded = checkauth(1000, Some(&fid), true, None).unwrap();
        assert_eq!(recorded, Some(1000));
    }
}
