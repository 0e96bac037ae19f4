use dmxp_mq::trace::init_tracing;
use dmxp_mq::{MqError, MqEvent, MqMachineState, MqMode, MqNode, MqParams, NodeBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn bind_local_round_trip() {
    init_tracing();
    let node = MqNode::bind(MqParams::local("round-trip")).unwrap();
    assert_eq!(node.mode(), MqMode::Bind);
    node.wait_enable(WAIT).unwrap();

    node.send_str("hello").unwrap();
    node.send(b"\x00\x01\x02").unwrap();
    node.send_event(MqEvent::None, "untyped").unwrap();

    assert_eq!(node.recv_wait(WAIT).unwrap().payload(), b"hello");
    assert_eq!(node.recv_wait(WAIT).unwrap().payload(), b"\x00\x01\x02");
    let untyped = node.recv_wait(WAIT).unwrap();
    assert_eq!(untyped.to_string_lossy(), "untyped");
}

#[test]
fn close_message_ends_the_loop() {
    let node = MqNode::bind(MqParams::local("closer")).unwrap();
    node.wait_enable(WAIT).unwrap();

    node.send_str("before").unwrap();
    node.send_close_msg().unwrap();
    node.join().unwrap();

    assert_eq!(node.state(), MqMachineState::Closed);
    assert!(!node.is_enabled());
    assert!(matches!(node.send_str("after"), Err(MqError::IllegalState { .. })));
    assert!(matches!(node.send_close_msg(), Err(MqError::IllegalState { .. })));

    assert_eq!(node.recv().unwrap().payload(), b"before");
    assert!(matches!(node.recv_wait(WAIT), Err(MqError::Canceled)));

    // The loop has already been reaped.
    node.join().unwrap();
}

#[test]
fn connect_waits_for_activation() {
    let node = NodeBuilder::new()
        .with_address("connector")
        .with_wait_on_activation(WAIT)
        .connect()
        .unwrap();

    assert_eq!(node.mode(), MqMode::Connect);
    assert!(node.is_enabled());
    assert_eq!(node.state(), MqMachineState::Active);
}

#[test]
fn builder_callbacks_see_every_message() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));

    let node = {
        let accepted = accepted.clone();
        let received = received.clone();
        NodeBuilder::new()
            .with_address("callbacks")
            .with_send_queue_size(16)
            .with_accept_callback(move |peer| {
                assert_eq!(peer, "callbacks");
                accepted.fetch_add(1, Ordering::SeqCst);
                true
            })
            .with_write_callback(|msg| {
                let mut tagged = b"w:".to_vec();
                tagged.extend_from_slice(msg.payload());
                msg.set_payload(&tagged);
                false
            })
            .with_recv_callback(move |msg| {
                assert!(msg.payload().starts_with(b"w:"));
                received.fetch_add(1, Ordering::SeqCst);
                true
            })
            .bind()
            .unwrap()
    };
    node.wait_enable(WAIT).unwrap();

    let mut sent = 0;
    while sent < 10 {
        match node.send_str(&format!("msg {sent}")) {
            Ok(()) => sent += 1,
            Err(e) if e.is_retryable() => thread::yield_now(),
            Err(e) => panic!("send failed: {e}"),
        }
    }
    node.send_close_msg().unwrap();
    node.join().unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(received.load(Ordering::SeqCst), 10);
    assert!(matches!(node.recv(), Err(MqError::Empty)));
}

#[test]
fn refused_peer_cancels_waiters() {
    let node = NodeBuilder::new()
        .with_accept_callback(|_| false)
        .bind()
        .unwrap();

    assert!(matches!(node.wait_enable(WAIT), Err(MqError::Canceled)));
    node.join().unwrap();
    assert_eq!(node.state(), MqMachineState::Closed);
}

#[test]
fn remote_transports_are_unsupported() {
    let err = MqNode::bind_uri("tcp://127.0.0.1:5555").unwrap_err();
    assert!(matches!(err, MqError::Unsupported("tcp")));

    let err = MqNode::connect_uri("pipe:///tmp/dmxp.sock").unwrap_err();
    assert!(matches!(err, MqError::Unsupported("pipe")));

    let err = MqNode::bind_uri("udp://nowhere").unwrap_err();
    assert!(matches!(err, MqError::InvalidUri { .. }));
}

#[test]
fn bind_uri_applies_query() {
    let node = MqNode::bind_uri("local://sized?send_queue_size=4&recv_queue_size=8").unwrap();
    assert_eq!(node.params().address, "sized");
    assert_eq!(node.local_queue().event_queue().capacity(), 4);

    let debug = format!("{node:?}");
    assert!(debug.contains("MqNode"));
    assert!(debug.contains("capacity: 4"));
}

#[test]
fn invalid_params_are_rejected_before_spawning() {
    let params = MqParams {
        send_queue_size: 0,
        ..MqParams::local("broken")
    };
    assert!(matches!(MqNode::bind(params), Err(MqError::IllegalArgument { .. })));
}

#[test]
fn dropping_node_cancels_blocked_consumer() {
    let node = MqNode::bind(MqParams::local("dropper")).unwrap();
    node.wait_enable(WAIT).unwrap();

    let queue = node.local_queue().clone();
    let consumer = thread::spawn(move || queue.recv_wait(Duration::ZERO));

    thread::sleep(Duration::from_millis(50));
    drop(node);

    assert!(matches!(consumer.join().unwrap(), Err(MqError::Canceled)));
}

#[test]
fn panicking_recv_callback_drops_only_that_message() {
    let node = NodeBuilder::new()
        .with_address("fragile")
        .with_recv_callback(|msg| {
            if msg.payload() == b"boom" {
                panic!("recv callback exploded");
            }
            false
        })
        .bind()
        .unwrap();
    node.wait_enable(WAIT).unwrap();

    node.send_str("boom").unwrap();
    node.send_str("still here").unwrap();

    assert_eq!(node.recv_wait(WAIT).unwrap().payload(), b"still here");
    assert_eq!(node.state(), MqMachineState::Active);

    node.send_close_msg().unwrap();
    node.join().unwrap();
    assert_eq!(node.state(), MqMachineState::Closed);
    // The slot that carried "boom" went back to the pool too.
    assert_eq!(node.local_queue().event_queue().in_flight_count(), 0);
}

#[test]
fn panicking_accept_callback_refuses_peer() {
    let node = NodeBuilder::new()
        .with_accept_callback(|_| panic!("accept callback exploded"))
        .bind()
        .unwrap();

    assert!(matches!(node.wait_enable(WAIT), Err(MqError::Canceled)));
    node.join().unwrap();
    assert_eq!(node.state(), MqMachineState::Closed);
    assert!(matches!(node.send_str("nobody home"), Err(MqError::IllegalState { state: "CLOSED" })));
}
