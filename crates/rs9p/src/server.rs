//! Owns the connection set and the pending/working request queues, and
//! drives the fixed-size worker pool that dispatches requests to the
//! backend. Grounded in `libnpfs`'s `Npsrv` (the `srv->lock`-guarded queues
//! plus a worker-thread pool), adapted to `std::sync::{Mutex, Condvar}`.

use std::collections::VecDeque;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;

use log::{debug, error, info, warn};

use crate::auth::{self, CredentialVerifier};
use crate::backend::Backend;
use crate::config::Config;
use crate::conn::Connection;
use crate::error::{errno::*, Error};
use crate::fcall::{FCall, MsgType, NOFID, QId, QIdType};
use crate::fid::{Fid, User};
use crate::io_err;
use crate::request::{Request, RequestState};
use crate::transport::Transport;
use crate::utils;

struct ServerState<Be: Backend> {
    connections: Vec<Arc<Connection<Be>>>,
    pending: VecDeque<Arc<Request<Be>>>,
    working: Vec<Arc<Request<Be>>>,
}

/// Owns everything that is shared across connections on one server: the
/// backend, the credential verifier, the connection set, and the two
/// request queues.
pub struct Server<Be: Backend> {
    pub config: Config,
    backend: Be,
    verifier: Arc<dyn CredentialVerifier>,
    state: Mutex<ServerState<Be>>,
    pending_cond: Condvar,
    /// Signaled whenever a request leaves the working list, so
    /// [`Connection::reset`]'s wait loop can recheck its predicate.
    reset_cond: Condvar,
}

impl<Be: Backend + 'static> Server<Be> {
    pub fn new(config: Config, backend: Be, verifier: Arc<dyn CredentialVerifier>) -> Arc<Self> {
        let nwthreads = config.nwthreads.max(1);
        let srv = Arc::new(Server {
            config,
            backend,
            verifier,
            state: Mutex::new(ServerState {
                connections: Vec::new(),
                pending: VecDeque::new(),
                working: Vec::new(),
            }),
            pending_cond: Condvar::new(),
            reset_cond: Condvar::new(),
        });

        for i in 0..nwthreads {
            let srv = srv.clone();
            thread::Builder::new()
                .name(format!("9p-worker-{i}"))
                .spawn(move || srv.worker_loop())
                .expect("failed to spawn worker thread");
        }

        srv
    }

    pub fn backend(&self) -> &Be {
        &self.backend
    }

    /// Accept a freshly connected transport and start its reader thread.
    pub fn add_connection(self: &Arc<Self>, transport: Transport) -> Arc<Connection<Be>> {
        let conn = Connection::new(Arc::downgrade(self), transport);
        self.state.lock().unwrap().connections.push(conn.clone());
        Connection::spawn_reader(conn.clone());
        conn
    }

    pub fn remove_connection(&self, conn: &Arc<Connection<Be>>) {
        let mut state = self.state.lock().unwrap();
        state.connections.retain(|c| !Arc::ptr_eq(c, conn));
    }

    /// Enqueue a freshly decoded request. Called by the reader thread; the
    /// caller must have already checked that the connection is not
    /// resetting.
    pub fn add_request(&self, req: Arc<Request<Be>>) {
        let mut state = self.state.lock().unwrap();
        state.pending.push_back(req);
        self.pending_cond.notify_one();
    }

    /// Remove every pending request belonging to `conn`, returning them so
    /// the caller can respond to each.
    fn drain_pending_for(&self, conn: &Arc<Connection<Be>>) -> Vec<Arc<Request<Be>>> {
        let mut state = self.state.lock().unwrap();
        let (mine, rest): (Vec<_>, VecDeque<_>) = state
            .pending
            .drain(..)
            .partition(|r| r.conn.upgrade().is_some_and(|c| Arc::ptr_eq(&c, conn)));
        state.pending = rest;
        mine
    }

    /// Snapshot every working (non-`Tversion`) request belonging to `conn`.
    fn snapshot_working_for(&self, conn: &Arc<Connection<Be>>) -> Vec<Arc<Request<Be>>> {
        let state = self.state.lock().unwrap();
        state
            .working
            .iter()
            .filter(|r| {
                !r.is_tversion() && r.conn.upgrade().is_some_and(|c| Arc::ptr_eq(&c, conn))
            })
            .cloned()
            .collect()
    }

    /// Block until no working, non-`Tversion` request remains for `conn`.
    /// This is the authoritative reset-wait semantics of the design notes:
    /// wait under the server lock on the reset condition.
    fn wait_for_working_drained(&self, conn: &Arc<Connection<Be>>) {
        let mut state = self.state.lock().unwrap();
        while state
            .working
            .iter()
            .any(|r| !r.is_tversion() && r.conn.upgrade().is_some_and(|c| Arc::ptr_eq(&c, conn)))
        {
            state = self.reset_cond.wait(state).unwrap();
        }
    }

    fn remove_from_working(&self, req: &Arc<Request<Be>>) {
        let mut state = self.state.lock().unwrap();
        state.working.retain(|r| !Arc::ptr_eq(r, req));
        drop(state);
        self.reset_cond.notify_all();
    }

    fn find_working_by_tag(&self, conn: &Arc<Connection<Be>>, tag: u16) -> Option<Arc<Request<Be>>> {
        let state = self.state.lock().unwrap();
        state
            .working
            .iter()
            .find(|r| r.tag == tag && r.conn.upgrade().is_some_and(|c| Arc::ptr_eq(&c, conn)))
            .cloned()
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            // Pop-from-pending and promote-to-working happen under the same
            // lock hold, mirroring `libnpfs`'s `np_wthread_proc` (a single
            // `srv->lock` critical section moves a request from `reqs` to
            // `workreqs`). If these were two separate critical sections, a
            // racing `reset_connection` could observe the request on
            // neither queue and never flush it.
            let req = {
                let mut state = self.state.lock().unwrap();
                while state.pending.is_empty() {
                    state = self.pending_cond.wait(state).unwrap();
                }
                let req = state.pending.pop_front().unwrap();
                req.set_state(RequestState::Working);
                state.working.push(req.clone());
                req
            };

            let Some(conn) = req.conn.upgrade() else {
                self.remove_from_working(&req);
                continue;
            };

            let rcall = self.dispatch(&req, &conn);
            req.set_reply(Some(rcall));
            self.remove_from_working(&req);
            conn.respond(&req);
        }
    }

    /// Perform reset's step 2-4: drain pending requests for `conn` with an
    /// empty reply (so `respond` simply signals without writing), flush
    /// every working request via the backend's `flush` hook, then wait for
    /// them to drain.
    pub(crate) fn reset_connection(&self, conn: &Arc<Connection<Be>>) {
        for req in self.drain_pending_for(conn) {
            req.set_reply(None);
            conn.respond(&req);
        }

        for req in self.snapshot_working_for(conn) {
            self.backend.flush(req.fid.as_deref());
        }

        self.wait_for_working_drained(conn);
    }

    /// Central dispatch: version/auth/attach/flush are handled by the core
    /// itself (they touch the fid pool and auth state machine directly);
    /// everything else is routed straight to the backend.
    fn dispatch(&self, req: &Arc<Request<Be>>, conn: &Arc<Connection<Be>>) -> FCall {
        use crate::fcall::FCall::*;

        let result = match &req.tcall {
            TVersion { msize, version } => self.handle_version(conn, *msize, version),
            TAuth {
                afid,
                uname,
                aname,
                n_uname,
            } => self.handle_auth(conn, *afid, uname, aname, *n_uname),
            TAttach {
                fid,
                afid,
                uname,
                aname,
                n_uname,
            } => self.handle_attach(conn, *fid, *afid, uname, aname, *n_uname),
            TFlush { oldtag } => Ok(self.handle_flush(conn, *oldtag)),
            TClunk { fid } => self.handle_clunk(conn, *fid),
            TWrite { fid, offset, data } => self.handle_write(conn, *fid, *offset, data),
            TRead { fid, offset, count } => self.handle_read(conn, *fid, *offset, *count),
            other => self.dispatch_to_backend(conn, other),
        };

        result.unwrap_or_else(|e| {
            error!(
                "{:?}: tag {}: {}",
                MsgType::from(&req.tcall),
                req.tag,
                e
            );
            RlError { ecode: e.errno() as u32 }
        })
    }

    fn handle_version(
        &self,
        conn: &Arc<Connection<Be>>,
        msize: u32,
        version: &str,
    ) -> Result<FCall, Error> {
        // Tversion resets connection state and renegotiates msize.
        conn.destroy_fidpool(&self.backend);
        let negotiated = msize.min(self.config.msize);
        conn.set_msize(negotiated);
        self.backend.rversion(negotiated, version)
    }

    fn handle_auth(
        &self,
        conn: &Arc<Connection<Be>>,
        afid: u32,
        uname: &str,
        aname: &str,
        n_uname: u32,
    ) -> Result<FCall, Error> {
        match auth::startauth(self.config.auth_required) {
            auth::StartAuth::NotRequired => Err(Error::No(ECONNREFUSED)),
            auth::StartAuth::Proceed => {
                let aqid = QId {
                    typ: QIdType::AUTH,
                    version: 0,
                    path: 0,
                };
                let user = User::new(uname, n_uname, n_uname);
                conn.fidpool()
                    .create_fid(Fid::auth(afid, user, aname, aqid))?;
                Ok(FCall::RAuth { aqid })
            }
        }
    }

    fn handle_attach(
        &self,
        conn: &Arc<Connection<Be>>,
        fid: u32,
        afid: u32,
        uname: &str,
        aname: &str,
        n_uname: u32,
    ) -> Result<FCall, Error> {
        let afid_ref = if afid == NOFID {
            None
        } else {
            Some(
                conn.fidpool()
                    .lookup(afid)
                    .ok_or(Error::No(EBADF))?,
            )
        };

        let prior_authuser = conn.authuser();
        let recorded = auth::checkauth(
            n_uname,
            afid_ref.as_deref(),
            self.config.auth_required,
            prior_authuser,
        )?;
        if let Some(uid) = recorded {
            conn.set_authuser(uid);
        }

        let rattach = self.backend.rattach(
            &placeholder_fid(fid, uname, n_uname, aname),
            afid_ref.as_deref(),
            uname,
            aname,
            n_uname,
        )?;

        let qid = match &rattach {
            FCall::RAttach { qid } => *qid,
            _ => return Err(Error::No(EPROTO)),
        };

        let user = User::new(uname, n_uname, n_uname);
        conn.fidpool()
            .create_fid(Fid::regular(fid, user, aname, qid, Default::default()))?;

        Ok(rattach)
    }

    fn handle_flush(&self, conn: &Arc<Connection<Be>>, oldtag: u16) -> FCall {
        if let Some(target) = self.find_working_by_tag(conn, oldtag) {
            self.backend.flush(target.fid.as_deref());
        }
        FCall::RFlush
    }

    fn handle_clunk(&self, conn: &Arc<Connection<Be>>, fid: u32) -> Result<FCall, Error> {
        let f = conn.fidpool().lookup(fid).ok_or(Error::No(EBADF))?;
        let reply = if f.is_auth() {
            if let Some(state) = f.as_auth() {
                auth::auth_clunk(state);
            }
            FCall::RClunk
        } else {
            self.backend.rclunk(&f)?
        };
        conn.fidpool().remove(fid);
        Ok(reply)
    }

    fn handle_write(
        &self,
        conn: &Arc<Connection<Be>>,
        fid: u32,
        offset: u64,
        data: &crate::fcall::Data,
    ) -> Result<FCall, Error> {
        let f = conn.fidpool().lookup(fid).ok_or(Error::No(EBADF))?;
        if let Some(state) = f.as_auth() {
            let mut state = state.lock().unwrap();
            let n = auth::auth_write(&mut state, self.verifier.as_ref(), offset, &data.0, f.user.uid)?;
            Ok(FCall::RWrite { count: n })
        } else {
            self.backend.rwrite(&f, offset, data)
        }
    }

    fn handle_read(
        &self,
        conn: &Arc<Connection<Be>>,
        fid: u32,
        offset: u64,
        count: u32,
    ) -> Result<FCall, Error> {
        let f = conn.fidpool().lookup(fid).ok_or(Error::No(EBADF))?;
        if f.is_auth() {
            let _ = auth::auth_read();
            Ok(FCall::RRead {
                data: crate::fcall::Data(Vec::new()),
            })
        } else {
            self.backend.rread(&f, offset, count)
        }
    }

    /// Every other message: resolve its fid(s)/newfid and route straight to
    /// the matching backend method.
    #[rustfmt::skip]
    fn dispatch_to_backend(&self, conn: &Arc<Connection<Be>>, body: &FCall) -> Result<FCall, Error> {
        use crate::fcall::FCall::*;

        let pool = conn.fidpool();
        let get = |id: &u32| pool.lookup(*id).ok_or(Error::No(EBADF));

        match body {
            TStatFs { fid }                                                    => self.backend.rstatfs(&get(fid)?),
            TlOpen { fid, flags }                                              => self.backend.rlopen(&get(fid)?, *flags),
            TlCreate { fid, name, flags, mode, gid }                           => self.backend.rlcreate(&get(fid)?, name, *flags, *mode, *gid),
            TSymlink { fid, name, symtgt, gid }                                => self.backend.rsymlink(&get(fid)?, name, symtgt, *gid),
            TMkNod { dfid, name, mode, major, minor, gid }                     => self.backend.rmknod(&get(dfid)?, name, *mode, *major, *minor, *gid),
            TRename { fid, dfid, name }                                       => self.backend.rrename(&get(fid)?, &get(dfid)?, name),
            TReadLink { fid }                                                  => self.backend.rreadlink(&get(fid)?),
            TGetAttr { fid, req_mask }                                         => self.backend.rgetattr(&get(fid)?, *req_mask),
            TSetAttr { fid, valid, stat }                                      => self.backend.rsetattr(&get(fid)?, *valid, stat),
            TxAttrWalk { fid, newfid, name }                                   => self.backend.rxattrwalk(&get(fid)?, &get(newfid)?, name),
            TxAttrCreate { fid, name, attr_size, flags }                       => self.backend.rxattrcreate(&get(fid)?, name, *attr_size, *flags),
            TReadDir { fid, offset, count }                                    => self.backend.rreaddir(&get(fid)?, *offset, *count),
            TFSync { fid }                                                     => self.backend.rfsync(&get(fid)?),
            TLock { fid, flock }                                               => self.backend.rlock(&get(fid)?, flock),
            TGetLock { fid, flock }                                            => self.backend.rgetlock(&get(fid)?, flock),
            TLink { dfid, fid, name }                                          => self.backend.rlink(&get(dfid)?, &get(fid)?, name),
            TMkDir { dfid, name, mode, gid }                                   => self.backend.rmkdir(&get(dfid)?, name, *mode, *gid),
            TRenameAt { olddirfid, oldname, newdirfid, newname }               => self.backend.rrenameat(&get(olddirfid)?, oldname, &get(newdirfid)?, newname),
            TUnlinkAt { dirfd, name, flags }                                   => self.backend.runlinkat(&get(dirfd)?, name, *flags),
            TWalk { fid, newfid, wnames } => {
                let src = get(fid)?;
                let reply = self.backend.rwalk(&src, &placeholder_fid(*newfid, &src.user.uname, src.user.uid, &src.aname), wnames)?;
                if let FCall::RWalk { wqids } = &reply {
                    if wqids.len() == wnames.len() {
                        let qid = wqids.last().copied().unwrap_or_else(|| src.qid());
                        pool.create_fid(Fid::regular(*newfid, src.user.clone(), src.aname.clone(), qid, Default::default()))?;
                    }
                }
                Ok(reply)
            }
            TRemove { fid }                                                    => self.backend.rremove(&get(fid)?),
            _ => {
                warn!("unhandled message type {:?}", MsgType::from(body));
                Err(Error::No(EOPNOTSUPP))
            }
        }
    }

    pub(crate) fn log_debug(&self, msg: &str) {
        debug!("{}", msg);
    }
}

/// A throwaway fid used only to pass `(user, aname)` into backend entry
/// points that don't yet have a pool-resident fid to hand over (attach and
/// the target side of a walk, before the core has committed the new fid to
/// the pool). Never inserted into a [`crate::fid::FidPool`].
fn placeholder_fid<A: Default>(id: u32, uname: &str, uid: u32, aname: &str) -> Fid<A> {
    Fid::regular(
        id,
        User::new(uname, uid, uid),
        aname,
        QId {
            typ: QIdType::FILE,
            version: 0,
            path: 0,
        },
        A::default(),
    )
}

impl<Be: Backend> Server<Be> {
    pub fn verifier(&self) -> &Arc<dyn CredentialVerifier> {
        &self.verifier
    }
}

impl<Be: Backend + 'static> Server<Be> {
    /// Accept connections on `tcp!host!port` or `unix!path!0`, blocking the
    /// calling thread for the lifetime of the listener. One reader thread
    /// is spawned per accepted connection; this loop does no dispatch work
    /// itself.
    pub fn listen(self: &Arc<Self>, addr: &str) -> crate::Result<()> {
        let (proto, host, port) =
            utils::parse_proto(addr).ok_or_else(|| io_err!(InvalidInput, "invalid protocol or address"))?;

        match proto {
            "tcp" => self.listen_tcp(&format!("{host}:{port}")),
            "unix" => self.listen_unix(host),
            other => Err(io_err!(InvalidInput, format!("unsupported protocol: {other}")).into()),
        }
    }

    fn listen_tcp(self: &Arc<Self>, addr: &str) -> crate::Result<()> {
        let listener = TcpListener::bind(addr)?;
        info!("listening on tcp!{}", addr);
        for stream in listener.incoming() {
            let stream = stream?;
            info!("accepted: {:?}", stream.peer_addr());
            let transport = Transport::from_tcp(stream)?;
            self.add_connection(transport);
        }
        Ok(())
    }

    fn listen_unix(self: &Arc<Self>, path: &str) -> crate::Result<()> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        info!("listening on unix!{}", path);
        for stream in listener.incoming() {
            let stream = stream?;
            info!("accepted: {:?}", stream.peer_addr());
            let transport = Transport::from_unix(stream)?;
            self.add_connection(transport);
        }
        Ok(())
    }
}

// Allow Connection to reach back into the server it belongs to.
pub(crate) type ServerHandle<Be> = Weak<Server<Be>>;
