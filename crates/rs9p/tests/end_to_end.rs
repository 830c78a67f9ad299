//! End-to-end scenarios over a real connected pair of sockets, driving the
//! server through its public API exactly as a real 9P client would: one
//! side is handed to `Server::add_connection`, the other is this test
//! reading/writing raw frames.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rs9p::auth::CredentialVerifier;
use rs9p::backend::Backend;
use rs9p::config::Config;
use rs9p::error::{errno::*, Error};
use rs9p::fcall::*;
use rs9p::fid::Fid;
use rs9p::serialize::{decode_frame, encode_frame};
use rs9p::server::Server;
use rs9p::transport::Transport;

#[derive(Default)]
struct Counters {
    flush_calls: AtomicUsize,
    closed_calls: AtomicUsize,
}

struct TestBackend {
    gate: Arc<(Mutex<bool>, Condvar)>,
    counters: Arc<Counters>,
}

impl Backend for TestBackend {
    type Fid = ();

    fn rattach(
        &self,
        _fid: &Fid<Self::Fid>,
        _afid: Option<&Fid<Self::Fid>>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall, Error> {
        Ok(FCall::RAttach {
            qid: QId {
                typ: QIdType::DIR,
                version: 0,
                path: 0,
            },
        })
    }

    fn rread(&self, _fid: &Fid<Self::Fid>, _offset: u64, _count: u32) -> Result<FCall, Error> {
        let (lock, cvar) = &*self.gate;
        let mut released = lock.lock().unwrap();
        while !*released {
            released = cvar.wait(released).unwrap();
        }
        Err(Error::No(EINTR))
    }

    fn flush(&self, _fid: Option<&Fid<Self::Fid>>) {
        self.counters.flush_calls.fetch_add(1, Ordering::SeqCst);
        let (lock, cvar) = &*self.gate;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn connection_closed(&self) {
        self.counters.closed_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Parses a decimal-ASCII uid, with no partial-write handling — every test
/// here writes the whole credential in one `Twrite`.
struct DecimalVerifier;

impl CredentialVerifier for DecimalVerifier {
    fn verify(&self, blob: &[u8]) -> Result<u32, Error> {
        std::str::from_utf8(blob)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::No(EIO))
    }
}

fn send(stream: &mut UnixStream, tag: u16, body: FCall) {
    let frame = encode_frame(&Msg { tag, body }).unwrap();
    stream.write_all(&frame).unwrap();
}

fn recv(stream: &mut UnixStream) -> Msg {
    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).unwrap();
    let size = u32::from_le_bytes(size_buf) as usize;
    let mut rest = vec![0u8; size - size_buf.len()];
    stream.read_exact(&mut rest).unwrap();
    let mut full = size_buf.to_vec();
    full.extend_from_slice(&rest);
    decode_frame(&full).unwrap()
}

fn harness(auth_required: bool) -> (Arc<Server<TestBackend>>, UnixStream, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let backend = TestBackend {
        gate: Arc::new((Mutex::new(false), Condvar::new())),
        counters: counters.clone(),
    };
    let config = Config {
        auth_required,
        ..Config::default()
    };
    let srv = Server::new(config, backend, Arc::new(DecimalVerifier));
    let (client, server_side) = UnixStream::pair().unwrap();
    srv.add_connection(Transport::from_unix(server_side).unwrap());
    (srv, client, counters)
}

#[test]
fn scenario_1_unauthenticated_attach_when_auth_disabled() {
    let (_srv, mut client, _counters) = harness(false);

    send(
        &mut client,
        1,
        FCall::TAttach {
            fid: 1,
            afid: NOFID,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    let reply = recv(&mut client);
    assert_eq!(reply.tag, 1);
    assert!(matches!(reply.body, FCall::RAttach { .. }), "{:?}", reply.body);
}

#[test]
fn scenario_2_authenticated_attach_happy_path() {
    let (_srv, mut client, _counters) = harness(true);

    send(
        &mut client,
        1,
        FCall::TAuth {
            afid: 2,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    let reply = recv(&mut client);
    assert!(matches!(
        reply.body,
        FCall::RAuth {
            aqid: QId {
                typ: QIdType::AUTH,
                version: 0,
                path: 0
            }
        }
    ));

    let cred = b"1000".to_vec();
    send(
        &mut client,
        2,
        FCall::TWrite {
            fid: 2,
            offset: 0,
            data: Data(cred.clone()),
        },
    );
    let reply = recv(&mut client);
    assert!(matches!(reply.body, FCall::RWrite { count } if count == cred.len() as u32));

    send(
        &mut client,
        3,
        FCall::TAttach {
            fid: 1,
            afid: 2,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    let reply = recv(&mut client);
    assert!(matches!(reply.body, FCall::RAttach { .. }), "{:?}", reply.body);

    send(&mut client, 4, FCall::TClunk { fid: 2 });
    let reply = recv(&mut client);
    assert!(matches!(reply.body, FCall::RClunk));
}

#[test]
fn scenario_3_auth_uid_mismatch_is_rejected_at_attach() {
    let (_srv, mut client, _counters) = harness(true);

    send(
        &mut client,
        1,
        FCall::TAuth {
            afid: 2,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    recv(&mut client);

    let cred = b"1001".to_vec();
    send(
        &mut client,
        2,
        FCall::TWrite {
            fid: 2,
            offset: 0,
            data: Data(cred.clone()),
        },
    );
    let reply = recv(&mut client);
    assert!(matches!(reply.body, FCall::RWrite { count } if count == cred.len() as u32));

    send(
        &mut client,
        3,
        FCall::TAttach {
            fid: 1,
            afid: 2,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    let reply = recv(&mut client);
    match reply.body {
        FCall::RlError { ecode } => assert_eq!(ecode as i32, EPERM),
        other => panic!("expected Rlerror(EPERM), got {:?}", other),
    }
}

#[test]
fn scenario_4_auth_write_at_wrong_offset() {
    let (_srv, mut client, _counters) = harness(true);

    send(
        &mut client,
        1,
        FCall::TAuth {
            afid: 2,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    recv(&mut client);

    send(
        &mut client,
        2,
        FCall::TWrite {
            fid: 2,
            offset: 5,
            data: Data(b"xxxx".to_vec()),
        },
    );
    let reply = recv(&mut client);
    match reply.body {
        FCall::RlError { ecode } => assert_eq!(ecode as i32, EIO),
        other => panic!("expected Rlerror(EIO), got {:?}", other),
    }

    let cred = b"1000".to_vec();
    send(
        &mut client,
        3,
        FCall::TWrite {
            fid: 2,
            offset: 0,
            data: Data(cred.clone()),
        },
    );
    let reply = recv(&mut client);
    assert!(matches!(reply.body, FCall::RWrite { count } if count == cred.len() as u32));
}

#[test]
fn scenario_5_flush_mid_read() {
    let (_srv, mut client, counters) = harness(false);

    send(
        &mut client,
        1,
        FCall::TAttach {
            fid: 3,
            afid: NOFID,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    recv(&mut client);

    send(
        &mut client,
        10,
        FCall::TRead {
            fid: 3,
            offset: 0,
            count: 8192,
        },
    );
    // Give the worker pool time to pick up the read and block in it before
    // the flush targeting the same tag is sent.
    std::thread::sleep(Duration::from_millis(50));

    send(&mut client, 11, FCall::TFlush { oldtag: 10 });

    let mut saw_read_reply = false;
    let mut saw_flush_reply = false;
    for _ in 0..2 {
        let reply = recv(&mut client);
        match (reply.tag, reply.body) {
            (10, FCall::RlError { ecode }) => {
                assert_eq!(ecode as i32, EINTR);
                saw_read_reply = true;
            }
            (11, FCall::RFlush) => saw_flush_reply = true,
            (tag, body) => panic!("unexpected reply tag {} body {:?}", tag, body),
        }
    }
    assert!(saw_read_reply && saw_flush_reply);
    assert!(counters.flush_calls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn reused_tag_while_in_flight_is_rejected() {
    // Spec §8 invariant 5: at most one outstanding request per tag.
    let (_srv, mut client, _counters) = harness(false);

    send(
        &mut client,
        1,
        FCall::TAttach {
            fid: 3,
            afid: NOFID,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    recv(&mut client);

    send(
        &mut client,
        10,
        FCall::TRead {
            fid: 3,
            offset: 0,
            count: 8192,
        },
    );
    // Let the worker pick the read up and block in it before reusing the tag.
    std::thread::sleep(Duration::from_millis(50));

    // A second request reusing tag 10 while the first is still outstanding
    // must be dropped rather than enqueued, so no second reply for it is
    // ever written.
    send(
        &mut client,
        10,
        FCall::TRead {
            fid: 3,
            offset: 0,
            count: 8192,
        },
    );

    send(&mut client, 11, FCall::TFlush { oldtag: 10 });

    let mut saw_read_reply = false;
    let mut saw_flush_reply = false;
    for _ in 0..2 {
        let reply = recv(&mut client);
        match (reply.tag, reply.body) {
            (10, FCall::RlError { ecode }) => {
                assert_eq!(ecode as i32, EINTR);
                saw_read_reply = true;
            }
            (11, FCall::RFlush) => saw_flush_reply = true,
            (tag, body) => panic!("unexpected reply tag {} body {:?}", tag, body),
        }
    }
    assert!(saw_read_reply && saw_flush_reply);

    // No third reply (for the dropped duplicate) is pending on the wire.
    client
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut size_buf = [0u8; 4];
    assert!(
        client.read_exact(&mut size_buf).is_err(),
        "unexpected extra reply for the rejected duplicate tag"
    );
    client.set_read_timeout(None).unwrap();

    // The tag is free again once the original request completed; reusing it
    // now is served normally.
    send(
        &mut client,
        10,
        FCall::TRead {
            fid: 3,
            offset: 0,
            count: 8192,
        },
    );
    let reply = recv(&mut client);
    assert_eq!(reply.tag, 10);
    assert!(matches!(reply.body, FCall::RlError { ecode } if ecode as i32 == EINTR));
}

#[test]
fn scenario_6_connection_reset_on_close_does_not_wedge_the_server() {
    let (srv, mut client, counters) = harness(false);

    send(
        &mut client,
        1,
        FCall::TAttach {
            fid: 3,
            afid: NOFID,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    recv(&mut client);

    send(
        &mut client,
        20,
        FCall::TRead {
            fid: 3,
            offset: 0,
            count: 8192,
        },
    );
    std::thread::sleep(Duration::from_millis(50));

    drop(client);
    std::thread::sleep(Duration::from_millis(200));

    assert!(counters.flush_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(counters.closed_calls.load(Ordering::SeqCst), 1);

    // The server itself is still alive and can accept a fresh connection.
    let (mut client2, server_side2) = UnixStream::pair().unwrap();
    srv.add_connection(Transport::from_unix(server_side2).unwrap());
    send(
        &mut client2,
        1,
        FCall::TAttach {
            fid: 1,
            afid: NOFID,
            uname: "u".to_owned(),
            aname: "/".to_owned(),
            n_uname: 1000,
        },
    );
    let reply = recv(&mut client2);
    assert!(matches!(reply.body, FCall::RAttach { .. }), "{:?}", reply.body);
}
