//! A single in-flight 9P transaction.

use std::sync::{Arc, Mutex, Weak};

use crate::backend::Backend;
use crate::conn::Connection;
use crate::fcall::FCall;
use crate::fid::Fid;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Working,
    Responded,
    Flushed,
}

/// `{tag, tcall, rcall, conn, fid, state}` of the spec's data model. The
/// spec's `afid`/`newfid` members are not carried here: every op handler
/// that needs them (`handle_attach`, `dispatch_to_backend`'s `TWalk` arm,
/// …) looks them up fresh from the fid pool against the ids named in
/// `tcall` itself, so a second, request-scoped copy would just be a dead
/// field. The intrusive prev/next links of the source are dropped in favor
/// of `Server` holding ordinary `Vec`/`VecDeque`s of `Arc<Request>` — an
/// idiomatic substitution for C's hand-rolled doubly linked lists, not a
/// semantic change (see DESIGN.md).
pub struct Request<Be: Backend> {
    pub tag: u16,
    pub tcall: FCall,
    pub rcall: Mutex<Option<FCall>>,
    pub conn: Weak<Connection<Be>>,
    pub fid: Option<Arc<Fid<Be::Fid>>>,
    pub state: Mutex<RequestState>,
}

impl<Be: Backend> Request<Be> {
    /// `fid` is the request's primary operand fid (the first id named by
    /// `tcall.fids()`), resolved against the connection's fid pool at
    /// enqueue time so `flush`'s abort hook has something to hand the
    /// backend even though the op handlers look fids up again themselves.
    pub fn new(
        tag: u16,
        tcall: FCall,
        conn: Weak<Connection<Be>>,
        fid: Option<Arc<Fid<Be::Fid>>>,
    ) -> Self {
        Request {
            tag,
            tcall,
            rcall: Mutex::new(None),
            conn,
            fid,
            state: Mutex::new(RequestState::Pending),
        }
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: RequestState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_reply(&self, rcall: Option<FCall>) {
        *self.rcall.lock().unwrap() = rcall;
    }

    pub fn take_reply(&self) -> Option<FCall> {
        self.rcall.lock().unwrap().take()
    }

    /// Whether this request is exempt from connection-reset cancellation.
    pub fn is_tversion(&self) -> bool {
        matches!(self.tcall, FCall::TVersion { .. })
    }
}
