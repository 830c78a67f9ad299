//! [`rs9p::backend::Backend`] implementation over the in-memory [`Store`].

use rs9p::backend::Backend;
use rs9p::error::{errno::*, Error};
use rs9p::fcall::*;
use rs9p::fid::Fid;

use crate::store::{proto_to_systime, systime_to_proto, Kind, Store, ROOT_INO};

type Result<T> = ::std::result::Result<T, Error>;

fn qid_for(ino: u64, is_dir: bool) -> QId {
    QId {
        typ: if is_dir { QIdType::DIR } else { QIdType::FILE },
        version: 0,
        path: ino,
    }
}

#[derive(Default)]
pub struct MemFs {
    store: Store,
}

impl MemFs {
    pub fn new() -> Self {
        MemFs {
            store: Store::new(),
        }
    }
}

impl Backend for MemFs {
    type Fid = ();

    fn rattach(
        &self,
        _fid: &Fid<Self::Fid>,
        _afid: Option<&Fid<Self::Fid>>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        Ok(FCall::RAttach {
            qid: qid_for(ROOT_INO, true),
        })
    }

    fn rwalk(&self, fid: &Fid<Self::Fid>, _new: &Fid<Self::Fid>, wnames: &[String]) -> Result<FCall> {
        let inodes = self.store.inodes.lock().unwrap();
        let mut cur = fid.qid().path;
        let mut wqids = Vec::with_capacity(wnames.len());

        for (i, name) in wnames.iter().enumerate() {
            let node = match inodes.get(&cur) {
                Some(n) => n,
                None if i == 0 => return Err(Error::No(ENOENT)),
                None => break,
            };
            let next = if name == "." {
                Some(cur)
            } else if name == ".." {
                Some(node.parent)
            } else {
                match &node.kind {
                    Kind::Dir(children) => children.get(name).copied(),
                    Kind::File(_) => None,
                }
            };
            let next = match next {
                Some(n) => n,
                None if i == 0 => return Err(Error::No(ENOENT)),
                None => break,
            };
            let is_dir = inodes.get(&next).map(|n| n.is_dir()).unwrap_or(false);
            wqids.push(qid_for(next, is_dir));
            cur = next;
        }

        Ok(FCall::RWalk { wqids })
    }

    fn rgetattr(&self, fid: &Fid<Self::Fid>, req_mask: GetAttrMask) -> Result<FCall> {
        let ino = fid.qid().path;
        let inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get(&ino).ok_or(Error::No(ENOENT))?;
        Ok(FCall::RGetAttr {
            valid: req_mask,
            qid: qid_for(ino, node.is_dir()),
            stat: node.stat(),
        })
    }

    fn rsetattr(&self, fid: &Fid<Self::Fid>, valid: SetAttrMask, stat: &SetAttr) -> Result<FCall> {
        let ino = fid.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get_mut(&ino).ok_or(Error::No(ENOENT))?;

        if valid.contains(SetAttrMask::MODE) {
            node.mode = stat.mode;
        }
        if valid.contains(SetAttrMask::UID) {
            node.uid = stat.uid;
        }
        if valid.contains(SetAttrMask::GID) {
            node.gid = stat.gid;
        }
        if valid.contains(SetAttrMask::SIZE) {
            match &mut node.kind {
                Kind::File(data) => data.resize(stat.size as usize, 0),
                Kind::Dir(_) => return Err(Error::No(EISDIR)),
            }
        }
        if valid.contains(SetAttrMask::ATIME) {
            node.atime = if valid.contains(SetAttrMask::ATIME_SET) {
                proto_to_systime(stat.atime)
            } else {
                std::time::SystemTime::now()
            };
        }
        if valid.contains(SetAttrMask::MTIME) {
            node.mtime = if valid.contains(SetAttrMask::MTIME_SET) {
                proto_to_systime(stat.mtime)
            } else {
                std::time::SystemTime::now()
            };
        }
        Ok(FCall::RSetAttr)
    }

    fn rlopen(&self, fid: &Fid<Self::Fid>, _flags: u32) -> Result<FCall> {
        let ino = fid.qid().path;
        let inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get(&ino).ok_or(Error::No(ENOENT))?;
        Ok(FCall::RlOpen {
            qid: qid_for(ino, node.is_dir()),
            iounit: 0,
        })
    }

    fn rlcreate(
        &self,
        fid: &Fid<Self::Fid>,
        name: &str,
        _flags: u32,
        mode: u32,
        gid: u32,
    ) -> Result<FCall> {
        let dino = fid.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();
        {
            let dnode = inodes.get(&dino).ok_or(Error::No(ENOENT))?;
            match &dnode.kind {
                Kind::Dir(children) if children.contains_key(name) => return Err(Error::No(EEXIST)),
                Kind::Dir(_) => {}
                Kind::File(_) => return Err(Error::No(ENOTDIR)),
            }
        }
        let new_ino = self.store.alloc_ino();
        let now = std::time::SystemTime::now();
        inodes.insert(
            new_ino,
            crate::store::Inode {
                parent: dino,
                mode,
                uid: fid.user.uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
                kind: Kind::File(Vec::new()),
            },
        );
        if let Kind::Dir(children) = &mut inodes.get_mut(&dino).unwrap().kind {
            children.insert(name.to_owned(), new_ino);
        }
        let qid = qid_for(new_ino, false);
        *fid.qid.lock().unwrap() = qid;
        Ok(FCall::RlCreate { qid, iounit: 0 })
    }

    fn rmkdir(&self, fid: &Fid<Self::Fid>, name: &str, mode: u32, gid: u32) -> Result<FCall> {
        let dino = fid.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();
        {
            let dnode = inodes.get(&dino).ok_or(Error::No(ENOENT))?;
            match &dnode.kind {
                Kind::Dir(children) if children.contains_key(name) => return Err(Error::No(EEXIST)),
                Kind::Dir(_) => {}
                Kind::File(_) => return Err(Error::No(ENOTDIR)),
            }
        }
        let new_ino = self.store.alloc_ino();
        let now = std::time::SystemTime::now();
        inodes.insert(
            new_ino,
            crate::store::Inode {
                parent: dino,
                mode,
                uid: fid.user.uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
                kind: Kind::Dir(std::collections::BTreeMap::new()),
            },
        );
        if let Kind::Dir(children) = &mut inodes.get_mut(&dino).unwrap().kind {
            children.insert(name.to_owned(), new_ino);
        }
        Ok(FCall::RMkDir {
            qid: qid_for(new_ino, true),
        })
    }

    fn rreaddir(&self, fid: &Fid<Self::Fid>, off: u64, count: u32) -> Result<FCall> {
        let ino = fid.qid().path;
        let inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get(&ino).ok_or(Error::No(ENOENT))?;
        let children = match &node.kind {
            Kind::Dir(children) => children,
            Kind::File(_) => return Err(Error::No(ENOTDIR)),
        };

        let mut dirents = DirEntryData::new();
        let skip = if off == 0 {
            dirents.push(DirEntry {
                qid: qid_for(ino, true),
                offset: 0,
                typ: 0,
                name: ".".to_owned(),
            });
            dirents.push(DirEntry {
                qid: qid_for(node.parent, true),
                offset: 1,
                typ: 0,
                name: "..".to_owned(),
            });
            0
        } else {
            (off - 1) as usize
        };

        for (i, (name, child_ino)) in children.iter().enumerate().skip(skip) {
            let child = inodes.get(child_ino).ok_or(Error::No(ENOENT))?;
            let dirent = DirEntry {
                qid: qid_for(*child_ino, child.is_dir()),
                offset: 2 + i as u64,
                typ: 0,
                name: name.clone(),
            };
            if dirents.size() + dirent.size() > count {
                break;
            }
            dirents.push(dirent);
        }

        Ok(FCall::RReadDir { data: dirents })
    }

    fn rread(&self, fid: &Fid<Self::Fid>, offset: u64, count: u32) -> Result<FCall> {
        let ino = fid.qid().path;
        let inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get(&ino).ok_or(Error::No(ENOENT))?;
        match &node.kind {
            Kind::File(data) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(count as usize).min(data.len());
                Ok(FCall::RRead {
                    data: Data(data[start..end].to_vec()),
                })
            }
            Kind::Dir(_) => Err(Error::No(EISDIR)),
        }
    }

    fn rwrite(&self, fid: &Fid<Self::Fid>, offset: u64, data: &Data) -> Result<FCall> {
        let ino = fid.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();
        let node = inodes.get_mut(&ino).ok_or(Error::No(ENOENT))?;
        match &mut node.kind {
            Kind::File(buf) => {
                let start = offset as usize;
                let end = start + data.0.len();
                if end > buf.len() {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(&data.0);
                node.mtime = std::time::SystemTime::now();
                Ok(FCall::RWrite {
                    count: data.0.len() as u32,
                })
            }
            Kind::Dir(_) => Err(Error::No(EISDIR)),
        }
    }

    fn rrenameat(
        &self,
        olddirfid: &Fid<Self::Fid>,
        oldname: &str,
        newdirfid: &Fid<Self::Fid>,
        newname: &str,
    ) -> Result<FCall> {
        let old_dino = olddirfid.qid().path;
        let new_dino = newdirfid.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();

        let moved_ino = {
            let od = inodes.get(&old_dino).ok_or(Error::No(ENOENT))?;
            match &od.kind {
                Kind::Dir(children) => *children.get(oldname).ok_or(Error::No(ENOENT))?,
                Kind::File(_) => return Err(Error::No(ENOTDIR)),
            }
        };
        {
            let nd = inodes.get(&new_dino).ok_or(Error::No(ENOENT))?;
            match &nd.kind {
                Kind::Dir(children) if children.contains_key(newname) => {
                    return Err(Error::No(EEXIST));
                }
                Kind::Dir(_) => {}
                Kind::File(_) => return Err(Error::No(ENOTDIR)),
            }
        }

        if let Kind::Dir(children) = &mut inodes.get_mut(&old_dino).unwrap().kind {
            children.remove(oldname);
        }
        if let Kind::Dir(children) = &mut inodes.get_mut(&new_dino).unwrap().kind {
            children.insert(newname.to_owned(), moved_ino);
        }
        inodes.get_mut(&moved_ino).unwrap().parent = new_dino;

        Ok(FCall::RRenameAt)
    }

    fn runlinkat(&self, dirfd: &Fid<Self::Fid>, name: &str, _flags: u32) -> Result<FCall> {
        let dino = dirfd.qid().path;
        let mut inodes = self.store.inodes.lock().unwrap();

        let target_ino = {
            let dnode = inodes.get(&dino).ok_or(Error::No(ENOENT))?;
            match &dnode.kind {
                Kind::Dir(children) => *children.get(name).ok_or(Error::No(ENOENT))?,
                Kind::File(_) => return Err(Error::No(ENOTDIR)),
            }
        };
        if let Some(target) = inodes.get(&target_ino) {
            if let Kind::Dir(children) = &target.kind {
                if !children.is_empty() {
                    return Err(Error::No(ENOTEMPTY));
                }
            }
        }
        if let Kind::Dir(children) = &mut inodes.get_mut(&dino).unwrap().kind {
            children.remove(name);
        }
        inodes.remove(&target_ino);

        Ok(FCall::RUnlinkAt)
    }

    fn rremove(&self, fid: &Fid<Self::Fid>) -> Result<FCall> {
        let ino = fid.qid().path;
        if ino == ROOT_INO {
            return Err(Error::No(EPERM));
        }
        let mut inodes = self.store.inodes.lock().unwrap();
        let parent = inodes.get(&ino).ok_or(Error::No(ENOENT))?.parent;
        if let Kind::Dir(children) = &inodes.get(&ino).unwrap().kind {
            if !children.is_empty() {
                return Err(Error::No(ENOTEMPTY));
            }
        }
        if let Kind::Dir(children) = &mut inodes.get_mut(&parent).unwrap().kind {
            children.retain(|_, v| *v != ino);
        }
        inodes.remove(&ino);
        Ok(FCall::RRemove)
    }

    fn rclunk(&self, _fid: &Fid<Self::Fid>) -> Result<FCall> {
        // Nothing in the store is held per-fid (no open file handle, no
        // refcount) — the fid's qid.path is just an inode lookup key.
        Ok(FCall::RClunk)
    }

    fn rstatfs(&self, _fid: &Fid<Self::Fid>) -> Result<FCall> {
        let count = self.store.inodes.lock().unwrap().len() as u64;
        Ok(FCall::RStatFs {
            statfs: StatFs {
                typ: 0,
                bsize: 4096,
                blocks: 1 << 20,
                bfree: 1 << 19,
                bavail: 1 << 19,
                files: count,
                ffree: u64::MAX - count,
                fsid: 0,
                namelen: 255,
            },
        })
    }
}
