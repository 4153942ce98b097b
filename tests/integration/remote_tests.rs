//! Remote sessions: framed messages over a `MemoryPipe`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ifbind::prelude::*;
use ifbind::rpc::channel::RemoteReader;
use ifbind::rpc::codec::{MAX_ENCODED_SIZE, encode_frame};
use ifbind::rpc::message::{Buffer, Message};

use crate::mock_service::{self, ADD_WATCH, DESCRIBE, GET_TEMP, Harness, TEMP};

fn frame(msg: &Message) -> Vec<u8> {
    let mut out = [0u8; MAX_ENCODED_SIZE];
    let n = encode_frame(msg, &mut out).unwrap();
    out[..n].to_vec()
}

fn raw(id: MessageId, txn: u32, body: &[u8]) -> Vec<u8> {
    frame(&Message::new(id, txn, Buffer::from_slice(body).unwrap()))
}

fn hello() -> Vec<u8> {
    frame(&Message::hello(&mock_service::probe_schema().fingerprint()))
}

/// Move everything the peer wrote into the server and handle it. A
/// frame split across reads posts nothing on the first pump, so pump a
/// few times rather than stopping at the first empty one.
fn settle<T: Transport>(h: &mut Harness, reader: &mut RemoteReader<T>) {
    for _ in 0..8 {
        if reader.pump().is_err() {
            break;
        }
    }
    h.server.poll();
}

fn attach(h: &Harness) -> (MemoryPipe, RemoteReader<MemoryPipe>) {
    let (near, far) = MemoryPipe::pair();
    let reader = h.handle.attach(far).unwrap();
    (near, reader)
}

fn read_all(pipe: &mut MemoryPipe) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    while let Ok(n @ 1..) = pipe.read(&mut buf) {
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn remote_client_round_trip() {
    let mut h = mock_service::start();
    let (near, mut reader) = attach(&h);
    let mut client = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();
    settle(&mut h, &mut reader);

    let txn = client
        .send_call(DESCRIBE, 0b11, &[Value::U8(3), Value::from("pump")])
        .unwrap();
    settle(&mut h, &mut reader);
    assert_eq!(client.pump().unwrap(), 1);

    let r = client.take_response(txn).unwrap();
    assert_eq!(r.outputs, vec![Some(Value::from("PUMP")), Some(Value::U32(30))]);
}

#[test]
fn return_only_response_carries_no_output_bytes() {
    let mut h = mock_service::start();
    let (mut near, mut reader) = attach(&h);

    near.write(&hello()).unwrap();
    near.write(&raw(GET_TEMP, 7, &[])).unwrap();
    settle(&mut h, &mut reader);

    let mut expected = Vec::new();
    expected.extend_from_slice(&12u32.to_le_bytes());
    expected.extend_from_slice(&GET_TEMP.to_le_bytes());
    expected.extend_from_slice(&7u32.to_le_bytes());
    expected.extend_from_slice(&TEMP.to_le_bytes());
    assert_eq!(read_all(&mut near), expected);
}

#[test]
fn oversized_string_closes_the_session_before_any_handler_runs() {
    let mut h = mock_service::start();
    let (mut near, mut reader) = attach(&h);

    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // outputs mask
    body.push(1); // index
    body.extend_from_slice(&50u32.to_le_bytes()); // label length, max is 16
    body.extend_from_slice(&[b'a'; 50]);

    near.write(&hello()).unwrap();
    near.write(&raw(DESCRIBE, 1, &body)).unwrap();
    settle(&mut h, &mut reader);

    assert_eq!(h.probe.call_count(), 0);
    assert_eq!(h.handle.stats().sessions, 0);
    assert!(near.is_closed());
}

#[test]
fn unknown_id_is_dropped_and_the_session_survives() {
    let mut h = mock_service::start();
    let (mut near, mut reader) = attach(&h);

    near.write(&hello()).unwrap();
    near.write(&raw(99, 1, &[1, 2, 3])).unwrap();
    near.write(&raw(GET_TEMP, 2, &[])).unwrap();
    settle(&mut h, &mut reader);

    assert_eq!(h.handle.stats().sessions, 1);
    assert_eq!(h.probe.call_count(), 1);
    assert_eq!(read_all(&mut near).len(), 16);
}

#[test]
fn wrong_fingerprint_is_refused() {
    let mut h = mock_service::start();
    let (near, mut reader) = attach(&h);
    let drifted = mock_service::probe_schema().operation(OperationSpec::call(9, "Extra"));

    let mut client = RemoteClient::connect(near, drifted).unwrap();
    settle(&mut h, &mut reader);

    assert_eq!(h.handle.stats().sessions, 0);
    assert!(client.pump().is_err());
    assert!(client.is_disconnected());
}

#[test]
fn call_before_hello_is_refused() {
    let mut h = mock_service::start();
    let (mut near, mut reader) = attach(&h);

    near.write(&raw(GET_TEMP, 1, &[])).unwrap();
    settle(&mut h, &mut reader);

    assert_eq!(h.probe.call_count(), 0);
    assert!(near.is_closed());
}

#[test]
fn corrupt_frame_header_terminates_the_session() {
    let mut h = mock_service::start();
    let (mut near, mut reader) = attach(&h);

    near.write(&hello()).unwrap();
    near.write(&3u32.to_le_bytes()).unwrap();
    near.write(&[0u8; 16]).unwrap();
    settle(&mut h, &mut reader);

    assert_eq!(h.handle.stats().sessions, 0);
    assert!(near.is_closed());
    assert_eq!(reader.pump(), Err(ChannelError::Closed));
}

#[test]
fn events_are_framed_to_remote_subscribers() {
    let mut h = mock_service::start();
    let (near, mut reader) = attach(&h);
    let mut client = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();

    let txn = client
        .send_call(ADD_WATCH, 0, &[Value::I32(40), Value::Reference(0x77)])
        .unwrap();
    settle(&mut h, &mut reader);
    client.pump().unwrap();
    let handle = client
        .take_response(txn)
        .and_then(|r| r.result)
        .and_then(|v| v.as_reference())
        .unwrap();
    assert_ne!(handle, 0);

    let notifier = h.probe.take_watch();
    assert!(notifier.notify(&[Value::Bool(true), Value::I32(45)]));
    client.pump().unwrap();

    let (id, event) = client.next_event().unwrap();
    assert_eq!(id, ADD_WATCH);
    assert_eq!(event.context, 0x77);
    assert_eq!(event.params, vec![Value::Bool(true), Value::I32(45)]);
}

#[test]
fn peer_hangup_cleans_up_its_subscriptions() {
    let mut h = mock_service::start();
    let (near, mut reader) = attach(&h);
    let mut client = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();

    client
        .send_call(ADD_WATCH, 0, &[Value::I32(1), Value::Reference(0)])
        .unwrap();
    settle(&mut h, &mut reader);
    assert_eq!(h.handle.stats().subscriptions, 1);

    client.close();
    // The read error becomes a close event.
    assert_eq!(reader.pump(), Ok(1));
    h.server.poll();

    assert_eq!(h.probe.removal_count(), 1);
    assert_eq!(h.handle.stats(), ServerStats::default());
}

#[test]
fn reader_thread_feeds_a_running_server() {
    let mut h = mock_service::start();
    let (near, reader) = attach(&h);
    let session = reader.session();
    let reader_thread = std::thread::spawn(move || reader.run());
    let handle = h.handle.clone();

    let client_thread = std::thread::spawn(move || {
        let mut client = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();
        let txn = client.send_call(GET_TEMP, 0, &[]).unwrap();
        let response = loop {
            client.pump().unwrap();
            if let Some(r) = client.take_response(txn) {
                break r;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        handle.shutdown();
        response
    });

    h.server.run();
    let response = client_thread.join().unwrap();
    reader_thread.join().unwrap();

    assert_eq!(response.result, Some(Value::I32(TEMP)));
    assert_eq!(h.handle.subscriptions_for(session), 0);
    assert_eq!(h.handle.stats().sessions, 0);
}

#[test]
fn local_and_remote_sessions_share_one_service() {
    let mut h = mock_service::start();
    let mut local = h.client();
    let (near, mut reader) = attach(&h);
    let mut remote = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();
    assert_eq!(h.handle.stats().sessions, 2);

    let remote_txn = remote.send_call(GET_TEMP, 0, &[]).unwrap();
    let local_txn = local.send_call(GET_TEMP, 0, &[]).unwrap();
    settle(&mut h, &mut reader);
    remote.pump().unwrap();

    let from_remote = remote.take_response(remote_txn).unwrap();
    let from_local = local.take_response(local_txn).unwrap();
    assert_eq!(from_remote.result, Some(Value::I32(TEMP)));
    assert_eq!(from_local.result, from_remote.result);
}

/// Pipe end that reads the server's statistics on every write.
struct Inspecting {
    pipe: MemoryPipe,
    handle: ServerHandle,
    sessions_seen: Arc<AtomicUsize>,
}

impl Transport for Inspecting {
    type Error = ChannelError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.pipe.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.sessions_seen
            .store(self.handle.stats().sessions, Ordering::SeqCst);
        self.pipe.write(data)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.pipe.flush()
    }

    fn available(&self) -> bool {
        self.pipe.available()
    }

    fn close(&mut self) {
        self.pipe.close();
    }
}

#[test]
fn transport_writes_run_outside_the_state_lock() {
    let mut h = mock_service::start();
    let seen = Arc::new(AtomicUsize::new(0));
    let (near, far) = MemoryPipe::pair();
    let mut reader = h
        .handle
        .attach(Inspecting {
            pipe: far,
            handle: h.handle.clone(),
            sessions_seen: seen.clone(),
        })
        .unwrap();
    let mut client = RemoteClient::connect(near, mock_service::probe_schema()).unwrap();

    let txn = client.send_call(GET_TEMP, 0, &[]).unwrap();
    settle(&mut h, &mut reader);
    client.pump().unwrap();

    let r = client.take_response(txn).unwrap();
    assert_eq!(r.result, Some(Value::I32(TEMP)));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
