//! End-to-end sessions against a simulated target sharing an in-process
//! region.

use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mchi_frame::{decode_tag, encode_tag, ByteReader, ByteWriter, DEFAULT_MAX_PAYLOAD};
use mchi_jor::{
    ControlInput, ControlValue, EventType, MessageType, NodeStatus, Session, SessionConfig,
    TreeCommand, TreeEvent, CHECK_BOX, OREF_MAGIC,
};
use mchi_transport::{
    ChannelConfig, LocalRegion, Magic, SharedRegion, Transport, TransportLayout,
};

const ROOT: u32 = 0x8040_0000;

/// The target end of the rings.
struct SimTarget {
    transport: Transport<LocalRegion>,
    recv: BytesMut,
}

impl SimTarget {
    fn new(region: LocalRegion) -> Self {
        let layout = TransportLayout::default().mirrored();
        let mut transport = Transport::new(region, layout, ChannelConfig::default())
            .expect("target transport should fit");
        transport.initialize().expect("rings should initialize");
        Self {
            transport,
            recv: BytesMut::new(),
        }
    }

    /// Every complete `ORef` payload the controller has sent so far.
    fn receive(&mut self) -> Vec<Bytes> {
        self.transport
            .receive(&mut self.recv)
            .expect("target should read its ring");
        let mut out = Vec::new();
        while let Some(tag) =
            decode_tag(&mut self.recv, DEFAULT_MAX_PAYLOAD).expect("tag stream should be valid")
        {
            assert_eq!(tag.magic, OREF_MAGIC);
            out.push(tag.payload);
        }
        out
    }

    fn send_tag(&mut self, magic: Magic, payload: &[u8]) {
        let mut buf = BytesMut::new();
        encode_tag(magic, payload, &mut buf).expect("tag should encode");
        self.transport.send(&buf).expect("target should write its ring");
    }

    fn send(&mut self, ty: MessageType, body: impl FnOnce(&mut ByteWriter)) {
        let mut w = ByteWriter::new();
        w.put_u32(ty as u32);
        body(&mut w);
        self.send_tag(OREF_MAGIC, &w.freeze());
    }
}

fn header(w: &mut ByteWriter, name: &str, ptr: u32) {
    w.put_sjis(name).expect("name should encode");
    w.put_u32(ptr).put_u32(0);
}

fn child_ptr(i: u32) -> u32 {
    0x8050_0000 + i * 0x100
}

fn object_info(children: u32) -> impl FnOnce(&mut ByteWriter) {
    move |w| {
        w.put_u32(TreeCommand::StartNode as u32);
        header(w, "ルート", ROOT);
        for i in 0..children {
            w.put_u32(TreeCommand::GenNode as u32);
            header(w, &format!("子{i}"), child_ptr(i));
        }
        w.put_u32(TreeCommand::GenControl as u32);
        w.put_magic(CHECK_BOX).put_u32(0x04);
        w.put_sjis("表示").expect("name should encode");
        w.put_u32(0).put_u32(1).put_u32(0x0001_0000);
        w.put_i16(0).put_i16(0).put_i16(100).put_i16(20);
        w.put_u32(TreeCommand::EndNode as u32);
    }
}

fn event_code(payload: &[u8]) -> u32 {
    ByteReader::new(payload).read_u32().expect("event code")
}

fn pair() -> (Session<LocalRegion>, SimTarget) {
    let region = LocalRegion::new(TransportLayout::default().region_size());
    let session = Session::new(region.clone(), SessionConfig::default()).expect("session should fit");
    (session, SimTarget::new(region))
}

/// A session whose outbound writes give up quickly when the target stops
/// draining its ring.
fn impatient_pair() -> (Session<LocalRegion>, SimTarget) {
    let region = LocalRegion::new(TransportLayout::default().region_size());
    let config = SessionConfig {
        channel: ChannelConfig {
            poll_interval: Duration::from_millis(1),
            write_timeout: Some(Duration::from_millis(20)),
            ..ChannelConfig::default()
        },
        ..SessionConfig::default()
    };
    let session = Session::new(region.clone(), config).expect("session should fit");
    (session, SimTarget::new(region))
}

/// Let the target drain its ring until the session has nothing left to
/// send, returning every payload the target saw.
fn drain_until_sent(session: &mut Session<LocalRegion>, target: &mut SimTarget) -> Vec<Bytes> {
    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.extend(target.receive());
        session.pump().expect("pump should succeed");
        if session.unsent_len() == 0 {
            seen.extend(target.receive());
            return seen;
        }
    }
    panic!("session never caught up, {} tags unsent", session.unsent_len());
}

/// Drive the session through root identification and the root's reply.
fn connect_with_tree(session: &mut Session<LocalRegion>, target: &mut SimTarget, children: u32) {
    session.pump().expect("pump should succeed");
    let sent = target.receive();
    assert_eq!(sent.len(), 1);
    assert_eq!(event_code(&sent[0]), EventType::GetRootObjectRef.code());

    target.send(MessageType::GetRootObjectRef, |w| header(w, "ルート", ROOT));
    session.pump().expect("pump should succeed");
    let sent = target.receive();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][..], &[0, 0, 0, 3, 0x80, 0x40, 0, 0]);

    target.send(MessageType::GenObjectInfo, object_info(children));
    session.pump().expect("pump should succeed");
}

#[test]
fn builds_tree_and_requests_children() {
    let (mut session, mut target) = pair();
    connect_with_tree(&mut session, &mut target, 3);

    let protocol = session.protocol().expect("target should be attached");
    let tree = protocol.tree();
    let root = tree.get(tree.root()).expect("root exists");
    assert_eq!(root.name(), "ルート");
    assert_eq!(root.status(), NodeStatus::Valid);
    let names: Vec<_> = root
        .children()
        .iter()
        .map(|&c| tree.get(c).expect("child exists").name().to_string())
        .collect();
    assert_eq!(names, ["子0", "子1", "子2"]);

    // The same pump swept the new children and asked for each of them.
    let requests = target.receive();
    assert_eq!(requests.len(), 3);
    for (i, payload) in requests.iter().enumerate() {
        let mut r = ByteReader::new(payload);
        assert_eq!(r.read_u32().expect("code"), EventType::GenObjectInfo.code());
        assert_eq!(r.read_u32().expect("ptr"), child_ptr(i as u32));
    }

    let events = session.drain_events();
    assert!(events.contains(&TreeEvent::RootIdentified { ptr: ROOT }));
    assert!(events.contains(&TreeEvent::NodeValid { ptr: ROOT }));
}

#[test]
fn property_event_reaches_target() {
    let (mut session, mut target) = pair();
    connect_with_tree(&mut session, &mut target, 0);
    target.receive();

    let root = session.protocol().expect("attached").tree().root();
    assert!(session
        .set_value(root, 1, ControlInput::Bool(true))
        .expect("checkbox accepts bool"));
    let report = session.pump().expect("pump should succeed");
    assert_eq!(report.tags_sent, 1);

    let sent = target.receive();
    let mut r = ByteReader::new(&sent[0]);
    assert_eq!(r.read_u32().expect("code"), EventType::PropertyEvent.code());
    assert_eq!(r.read_u32().expect("node"), ROOT);
    r.skip(4).expect("reserved");
    assert_eq!(r.read_magic().expect("type"), CHECK_BOX);
    r.skip(12).expect("kind, id, listener");
    assert_eq!(r.read_u32().expect("size"), 4);
    assert_eq!(r.read_u16().expect("value"), 1);
    assert_eq!(r.read_u16().expect("mask"), 1);

    let control = session
        .protocol()
        .and_then(|p| p.tree().get(root))
        .and_then(|n| n.control(1))
        .expect("control exists");
    assert_eq!(control.value, ControlValue::CheckBox { value: true, mask: 1 });
}

#[test]
fn stalled_request_is_resent() {
    let (mut session, mut target) = pair();
    connect_with_tree(&mut session, &mut target, 1);
    assert_eq!(target.receive().len(), 1);

    let report = session
        .pump_at(Instant::now() + Duration::from_secs(3))
        .expect("pump should succeed");
    assert_eq!(report.requests_swept, 1);
    let resent = target.receive();
    assert_eq!(resent.len(), 1);
    assert_eq!(&resent[0][4..], &child_ptr(0).to_be_bytes());
}

#[test]
fn unknown_tags_and_bad_messages_are_dropped() {
    let (mut session, mut target) = pair();
    session.pump().expect("pump should succeed");
    target.receive();

    target.send_tag(Magic::new(*b"XXXX"), b"ignored");
    target.send(MessageType::InvalidNode, |w| {
        w.put_u32(9).put_u32(ROOT).put_u32(3);
    });
    target.send(MessageType::GetRootObjectRef, |w| header(w, "ルート", ROOT));

    let report = session.pump().expect("pump should succeed");
    assert!(report.connected);
    assert_eq!(report.tags_dropped, 2);
    assert_eq!(report.tags_dispatched, 1);
    let tree = session.protocol().expect("attached").tree();
    assert_eq!(tree.get_by_ptr(ROOT), Some(tree.root()));
}

#[test]
fn target_restart_rebuilds_tree() {
    let (mut session, mut target) = pair();
    connect_with_tree(&mut session, &mut target, 2);
    target.receive();
    assert_eq!(session.protocol().expect("attached").tree().len(), 3);

    // Target goes away: its ring magic vanishes.
    target
        .transport
        .region_mut()
        .write_bytes(0x1000, &[0; 4])
        .expect("magic should be clearable");
    let report = session.pump().expect("pump should succeed");
    assert!(!report.connected);
    assert!(session.protocol().is_none());

    target.transport.initialize().expect("rings should initialize");
    let report = session.pump().expect("pump should succeed");
    assert!(report.connected);
    assert_eq!(session.protocol().expect("attached").tree().len(), 1);
    let sent = target.receive();
    assert_eq!(sent.len(), 1);
    assert_eq!(event_code(&sent[0]), EventType::GetRootObjectRef.code());
}

#[test]
fn reply_larger_than_ring_arrives_under_back_pressure() {
    let (mut session, mut target) = pair();
    session.pump().expect("pump should succeed");
    target.receive();
    target.send(MessageType::GetRootObjectRef, |w| header(w, "ルート", ROOT));
    session.pump().expect("pump should succeed");
    target.receive();

    // 400 children is well past the 4 KiB inbound ring.
    let writer = thread::spawn(move || {
        target.send(MessageType::GenObjectInfo, object_info(400));
        target
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        session.pump().expect("pump should succeed");
        let done = session
            .protocol()
            .map(|p| p.tree())
            .and_then(|t| t.get(t.root()).map(|r| r.status() == NodeStatus::Valid))
            .unwrap_or(false);
        if done {
            break;
        }
        assert!(Instant::now() < deadline, "reply never completed");
        thread::sleep(Duration::from_millis(1));
    }
    writer.join().expect("writer thread should finish");

    let tree = session.protocol().expect("attached").tree();
    assert_eq!(tree.len(), 401);
    assert_eq!(session.pending_len(), 0);
}

#[test]
fn root_request_survives_a_full_ring() {
    let (mut session, mut target) = impatient_pair();
    // 300 child requests overfill the 4 KiB outbound ring.
    connect_with_tree(&mut session, &mut target, 300);
    assert!(session.unsent_len() > 0);

    target.send(MessageType::Reset, |_| {});
    let report = session.pump().expect("a stall is not a session fault");
    assert!(report.connected);
    assert_eq!(report.tags_sent, 0);
    assert!(report.tags_unsent > 0);

    let seen = drain_until_sent(&mut session, &mut target);
    assert_eq!(seen.len(), 301);
    assert!(seen[..300]
        .iter()
        .all(|p| event_code(p) == EventType::GenObjectInfo.code()));
    assert_eq!(event_code(&seen[300]), EventType::GetRootObjectRef.code());

    target.send(MessageType::GetRootObjectRef, |w| header(w, "ルート", ROOT));
    session.pump().expect("pump should succeed");
    let tree = session.protocol().expect("attached").tree();
    assert_eq!(tree.get_by_ptr(ROOT), Some(tree.root()));
}

#[test]
fn property_event_held_by_full_ring_is_delivered_later() {
    let (mut session, mut target) = impatient_pair();
    connect_with_tree(&mut session, &mut target, 300);

    let root = session.protocol().expect("attached").tree().root();
    assert!(session
        .set_value(root, 1, ControlInput::Bool(true))
        .expect("checkbox accepts bool"));
    let report = session.pump().expect("a stall is not a session fault");
    assert_eq!(report.tags_sent, 0);
    assert!(session.unsent_len() > 0);

    let seen = drain_until_sent(&mut session, &mut target);
    let events: Vec<_> = seen
        .iter()
        .filter(|p| event_code(p) == EventType::PropertyEvent.code())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(&events[0][events[0].len() - 4..], &[0, 1, 0, 1]);

    // The target has the value now, so repeating it is a no-op.
    assert!(!session
        .set_value(root, 1, ControlInput::Bool(true))
        .expect("checkbox accepts bool"));
}
