//! Per-connection reader/dispatch loop and reset/shutdown protocol.
//!
//! Grounded in `libnpfs/conn.c`'s `np_conn` (the read loop, `np_conn_reset`'s
//! wait-under-lock algorithm) with the manual refcounting of the C source
//! replaced by plain `Arc` strong counts (see DESIGN.md): a `Connection` is
//! kept alive by whichever of {reader thread, server's connection set, any
//! in-flight `Request`} still holds a clone, with no cycle to break.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::warn;

use crate::auth;
use crate::backend::Backend;
use crate::fcall::Msg;
use crate::fid::FidPool;
use crate::request::{Request, RequestState};
use crate::serialize;
use crate::server::{Server, ServerHandle};
use crate::transport::{ReadHalf, Transport, WriteHalf};

/// A single 9P connection: one reader thread, one fid pool, one write lock.
pub struct Connection<Be: Backend> {
    srv: ServerHandle<Be>,
    /// Owned exclusively by the reader thread; wrapped in a `Mutex` only so
    /// teardown can take it to force the next read to observe EOF.
    reader: Mutex<Option<ReadHalf>>,
    /// `conn.wlock` of the design: guards the response path and nothing else.
    writer: Mutex<Option<WriteHalf>>,
    closer: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    msize: Mutex<u32>,
    fidpool: FidPool<Be::Fid>,
    resetting: Mutex<bool>,
    reset_done: Condvar,
    authuser: Mutex<Option<u32>>,
    /// Tags with a request currently on `pending` or `working` for this
    /// connection (spec §8 invariant 5: at most one outstanding request per
    /// tag). Inserted at enqueue, removed in `respond`.
    inflight_tags: Mutex<HashSet<u16>>,
}

impl<Be: Backend + 'static> Connection<Be> {
    pub(crate) fn new(srv: ServerHandle<Be>, transport: Transport) -> Arc<Self> {
        let msize = srv
            .upgrade()
            .map(|s| s.config.msize)
            .unwrap_or(8192 + crate::fcall::IOHDRSZ);
        let (reader, writer, closer) = transport.split();
        Arc::new(Connection {
            srv,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closer: Mutex::new(Some(closer)),
            msize: Mutex::new(msize),
            fidpool: FidPool::new(),
            resetting: Mutex::new(false),
            reset_done: Condvar::new(),
            authuser: Mutex::new(None),
            inflight_tags: Mutex::new(HashSet::new()),
        })
    }

    pub(crate) fn spawn_reader(conn: Arc<Self>) {
        thread::Builder::new()
            .name("9p-reader".to_owned())
            .spawn(move || conn.read_loop())
            .expect("failed to spawn reader thread");
    }

    pub fn fidpool(&self) -> &FidPool<Be::Fid> {
        &self.fidpool
    }

    pub fn msize(&self) -> u32 {
        *self.msize.lock().unwrap()
    }

    pub fn set_msize(&self, msize: u32) {
        *self.msize.lock().unwrap() = msize;
    }

    pub fn authuser(&self) -> Option<u32> {
        *self.authuser.lock().unwrap()
    }

    pub fn set_authuser(&self, uid: u32) {
        *self.authuser.lock().unwrap() = Some(uid);
    }

    /// §4.4 read loop: accumulate bytes, peel off complete frames, enqueue
    /// a `Request` for each unless the connection is resetting.
    fn read_loop(self: Arc<Self>) {
        let mut buf: Vec<u8> = Vec::new();

        loop {
            {
                let mut resetting = self.resetting.lock().unwrap();
                while *resetting {
                    resetting = self.reset_done.wait(resetting).unwrap();
                }
            }

            let mut tmp = vec![0u8; self.msize() as usize];
            let n = {
                let mut guard = self.reader.lock().unwrap();
                match guard.as_mut() {
                    Some(r) => r.read(&mut tmp),
                    None => break,
                }
            };
            let n = match n {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            buf.extend_from_slice(&tmp[..n]);

            let mut decode_failed = false;
            loop {
                let want = serialize::peek_size(&buf);
                if want == 0 || (buf.len() as u32) < want {
                    break;
                }
                let frame: Vec<u8> = buf.drain(..want as usize).collect();
                match serialize::decode_frame(&frame) {
                    Ok(msg) => self.enqueue(msg),
                    Err(e) => {
                        warn!("frame decode failed, dropping connection: {}", e);
                        decode_failed = true;
                        break;
                    }
                }
            }
            if decode_failed {
                break;
            }
        }

        self.teardown();
    }

    fn enqueue(self: &Arc<Self>, msg: Msg) {
        let Some(srv) = self.srv.upgrade() else {
            return;
        };
        if *self.resetting.lock().unwrap() {
            return;
        }
        // Spec §8 invariant 5: at most one outstanding request per tag. A
        // `T*` that reuses a tag still in flight is rejected rather than
        // enqueued, so two replies for the same tag are never written.
        if !self.inflight_tags.lock().unwrap().insert(msg.tag) {
            warn!("tag {} already in flight, dropping duplicate request", msg.tag);
            return;
        }
        let fid = msg
            .body
            .fids()
            .first()
            .and_then(|id| self.fidpool().lookup(*id));
        let req = Arc::new(Request::new(msg.tag, msg.body, Arc::downgrade(self), fid));
        srv.add_request(req);
    }

    /// Transport gone (EOF or decode error): drop the connection's own
    /// handle to the transport and run the reset path.
    fn teardown(self: &Arc<Self>) {
        *self.reader.lock().unwrap() = None;
        *self.writer.lock().unwrap() = None;
        *self.closer.lock().unwrap() = None;

        let Some(srv) = self.srv.upgrade() else {
            return;
        };
        srv.remove_connection(self);
        self.reset(&srv);
        srv.backend().connection_closed();
    }

    /// §4.4 reset protocol. Idempotent: a second call while already
    /// resetting (e.g. a racing teardown) is a no-op.
    pub fn reset(self: &Arc<Self>, srv: &Arc<Server<Be>>) {
        {
            let mut resetting = self.resetting.lock().unwrap();
            if *resetting {
                return;
            }
            *resetting = true;
        }

        srv.reset_connection(self);

        self.destroy_fidpool(srv.backend());

        *self.resetting.lock().unwrap() = false;
        self.reset_done.notify_all();
    }

    /// §4.2's `destroy()`: tear down every fid in the pool via the
    /// type-appropriate teardown (auth-clunk or backend `rclunk`). Shared by
    /// `reset()` above and `Server::handle_version`'s `Tversion` handling —
    /// both must fully release open fids, not just drop the table.
    pub(crate) fn destroy_fidpool(&self, backend: &Be) {
        self.fidpool.destroy(|fid| {
            if let Some(state) = fid.as_auth() {
                auth::auth_clunk(state);
            } else {
                let _ = backend.rclunk(fid);
            }
        });
    }

    /// Forcibly close the transport; the reader thread will observe EOF (or
    /// a forced shutdown) on its next read and run the reset path itself.
    pub fn shutdown(&self) {
        *self.writer.lock().unwrap() = None;
        if let Some(closer) = self.closer.lock().unwrap().take() {
            closer();
        }
    }

    /// Write `req`'s reply (if any) under `conn.wlock`. A write failure or
    /// an absent transport kills the write half; the reader will notice on
    /// its own. Always marks the request responded so a waiting reset can
    /// make progress.
    pub fn respond(&self, req: &Request<Be>) {
        // Frees the tag for reuse the instant this request is no longer
        // outstanding, matching the insert in `enqueue` above.
        self.inflight_tags.lock().unwrap().remove(&req.tag);
        if let Some(rcall) = req.take_reply() {
            let resetting = *self.resetting.lock().unwrap();
            if !resetting {
                let mut guard = self.writer.lock().unwrap();
                if let Some(writer) = guard.as_mut() {
                    let msg = Msg {
                        tag: req.tag,
                        body: rcall,
                    };
                    let failed = match serialize::encode_frame(&msg) {
                        Ok(frame) => writer.write_all(&frame).is_err(),
                        Err(_) => true,
                    };
                    if failed {
                        *guard = None;
                        drop(guard);
                        if let Some(closer) = self.closer.lock().unwrap().take() {
                            closer();
                        }
                    }
                }
            }
        }
        req.set_state(RequestState::Responded);
    }
}
