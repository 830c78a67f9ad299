//! Per-connection fid table.
//!
//! A fid is a client-chosen 32-bit handle bound to some server-side object
//! (a walked path, an open file, or an in-progress auth exchange). This
//! module owns the table and the fid's own storage; it knows nothing about
//! what a particular 9P operation does with a fid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::auth::AuthState;
use crate::error::{errno::*, Error};
use crate::fcall::QId;

/// The identity under which a fid was attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub uname: String,
    pub uid: u32,
    pub gid: u32,
    pub sgids: Vec<u32>,
}

impl User {
    pub fn new(uname: impl Into<String>, uid: u32, gid: u32) -> Self {
        User {
            uname: uname.into(),
            uid,
            gid,
            sgids: Vec::new(),
        }
    }
}

/// The typed slot a fid carries, erased to the backend's own associated
/// type at the crate boundary. Kept as a closed enum rather than `Box<dyn
/// Any>` so the core never needs downcasting.
pub enum FidKind<A> {
    Regular(Mutex<A>),
    Auth(Mutex<AuthState>),
}

/// A connection-scoped handle. `A` is the backend's own per-fid state type.
pub struct Fid<A> {
    pub id: u32,
    pub user: User,
    pub aname: String,
    pub qid: Mutex<QId>,
    pub open_mode: Mutex<Option<u8>>,
    pub aux: FidKind<A>,
}

impl<A> Fid<A> {
    pub fn regular(id: u32, user: User, aname: impl Into<String>, qid: QId, aux: A) -> Self {
        Fid {
            id,
            user,
            aname: aname.into(),
            qid: Mutex::new(qid),
            open_mode: Mutex::new(None),
            aux: FidKind::Regular(Mutex::new(aux)),
        }
    }

    pub fn auth(id: u32, user: User, aname: impl Into<String>, qid: QId) -> Self {
        Fid {
            id,
            user,
            aname: aname.into(),
            qid: Mutex::new(qid),
            open_mode: Mutex::new(None),
            aux: FidKind::Auth(Mutex::new(AuthState::new())),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.aux, FidKind::Auth(_))
    }

    pub fn as_auth(&self) -> Option<&Mutex<AuthState>> {
        match &self.aux {
            FidKind::Auth(m) => Some(m),
            FidKind::Regular(_) => None,
        }
    }

    pub fn as_regular(&self) -> Option<&Mutex<A>> {
        match &self.aux {
            FidKind::Regular(m) => Some(m),
            FidKind::Auth(_) => None,
        }
    }

    pub fn qid(&self) -> QId {
        *self.qid.lock().unwrap()
    }
}

/// Per-connection fid table: at most one [`Fid`] per id at any time.
pub struct FidPool<A> {
    table: Mutex<HashMap<u32, Arc<Fid<A>>>>,
}

impl<A> FidPool<A> {
    pub fn new() -> Self {
        FidPool {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `fid` into the table under its own id. Fails with `EEXIST` if the
    /// id is already bound.
    pub fn create_fid(&self, fid: Fid<A>) -> Result<Arc<Fid<A>>, Error> {
        let mut table = self.table.lock().unwrap();
        if table.contains_key(&fid.id) {
            return Err(Error::No(EEXIST));
        }
        let fid = Arc::new(fid);
        table.insert(fid.id, fid.clone());
        Ok(fid)
    }

    pub fn lookup(&self, id: u32) -> Option<Arc<Fid<A>>> {
        self.table.lock().unwrap().get(&id).cloned()
    }

    /// Remove a fid from the table. Teardown of its backend state is the
    /// caller's job, run outside any lock this pool holds.
    pub fn remove(&self, id: u32) -> Option<Arc<Fid<A>>> {
        self.table.lock().unwrap().remove(&id)
    }

    /// Tear down every fid in the table, calling `teardown` for each outside
    /// the pool lock. Used on connection reset and final connection teardown.
    pub fn destroy(&self, teardown: impl Fn(&Arc<Fid<A>>)) {
        let drained: Vec<_> = self.table.lock().unwrap().drain().map(|(_, v)| v).collect();
        for fid in &drained {
            teardown(fid);
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Default for FidPool<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::QIdType;

    fn qid() -> QId {
        QId {
            typ: QIdType::FILE,
            version: 0,
            path: 1,
        }
    }

    #[test]
    fn create_fid_rejects_duplicate_id() {
        let pool: FidPool<()> = FidPool::new();
        let user = User::new("alice", 1000, 1000);
        pool.create_fid(Fid::regular(1, user.clone(), "/", qid(), ()))
            .unwrap();
        let err = pool
            .create_fid(Fid::regular(1, user, "/", qid(), ()))
            .unwrap_err();
        assert_eq!(err.errno(), EEXIST);
    }

    #[test]
    fn lookup_and_remove() {
        let pool: FidPool<()> = FidPool::new();
        let user = User::new("alice", 1000, 1000);
        pool.create_fid(Fid::regular(5, user, "/", qid(), ())).unwrap();
        assert!(pool.lookup(5).is_some());
        assert!(pool.lookup(6).is_none());
        assert!(pool.remove(5).is_some());
        assert!(pool.lookup(5).is_none());
    }

    #[test]
    fn destroy_tears_down_every_fid() {
        let pool: FidPool<()> = FidPool::new();
        let user = User::new("alice", 1000, 1000);
        for id in 0..4 {
            pool.create_fid(Fid::regular(id, user.clone(), "/", qid(), ()))
                .unwrap();
        }
        let torn_down = Mutex::new(Vec::new());
        pool.destroy(|fid| torn_down.lock().unwrap().push(fid.id));
        assert_eq!(torn_down.into_inner().unwrap().len(), 4);
        assert!(pool.is_empty());
    }
}
