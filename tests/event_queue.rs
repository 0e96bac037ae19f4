use dmxp_mq::Core::Loop;
use dmxp_mq::MQ::Buffer::calc_minimum_queue_size;
use dmxp_mq::MQ::{AfterAction, MqEventHandler, MqEventQueue, SlotHandle, SlotRef};
use dmxp_mq::{MqError, MqEvent, MqMsg};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

// Test handler: records deliveries, optionally defers slots, closes on CLOSE,
// panics on a "boom" payload.
struct Recorder {
    events: MqEventQueue,
    defer: AtomicBool,
    deferred: Mutex<Vec<SlotHandle>>,
    received: Mutex<Vec<MqMsg>>,
    close_done_calls: AtomicUsize,
}

impl MqEventHandler for Recorder {
    fn event_queue(&self) -> &MqEventQueue {
        &self.events
    }

    fn on_msg(&self, slot: SlotRef<'_>) -> AfterAction {
        if slot.event() == MqEvent::Close {
            self.events.close_async_msgs();
            return AfterAction::Done;
        }
        if slot.msg().payload() == b"boom" {
            panic!("handler exploded");
        }
        self.received.lock().push(slot.msg().clone());
        if self.defer.load(Ordering::SeqCst) {
            self.deferred.lock().push(slot.handle());
            AfterAction::Deferred
        } else {
            AfterAction::Done
        }
    }

    fn on_close_msg_done(&self) {
        self.close_done_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn recorder(event_loop: &Loop, capacity: usize, msg_size: usize) -> Arc<Recorder> {
    Arc::new_cyclic(|weak: &Weak<Recorder>| {
        let owner: Weak<dyn MqEventHandler> = weak.clone();
        Recorder {
            events: MqEventQueue::new(event_loop, capacity, msg_size, owner),
            defer: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            close_done_calls: AtomicUsize::new(0),
        }
    })
}

// Drain everything, including events queued by callbacks of the previous pass.
fn service(event_loop: &Loop) {
    while event_loop.run_pending().unwrap() > 0 {}
}

#[test]
fn construction_fills_ready_queue() {
    let event_loop = Loop::new();
    for capacity in [1, 2, 3, 7, 8, 100, 1024] {
        let handler = recorder(&event_loop, capacity, 64);
        let n = calc_minimum_queue_size(capacity);
        assert_eq!(handler.events.capacity(), n);
        assert_eq!(handler.events.ready_count(), n);
        assert_eq!(handler.events.in_flight_count(), 0);
        assert!(handler.events.is_loop_thread());
    }
}

#[test]
fn exhausted_pool_reports_not_ready() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 5, 64);
    let n = handler.events.capacity();
    assert_eq!(n, 8);

    for i in 0..n {
        handler.events.enqueue(&MqMsg::data(vec![i as u8])).unwrap();
    }
    assert_eq!(handler.events.ready_count(), 0);
    assert_eq!(handler.events.in_flight_count(), n);

    let err = handler.events.enqueue(&MqMsg::data(b"one too many".to_vec())).unwrap_err();
    assert!(matches!(err, MqError::NotReady { capacity } if capacity == n));
    assert!(err.is_retryable());

    service(&event_loop);
    assert_eq!(handler.events.ready_count(), n);
    assert_eq!(handler.received.lock().len(), n);
}

#[test]
fn done_slot_returns_to_ready_queue() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 64);
    let n = handler.events.capacity();

    handler.events.enqueue(&MqMsg::from("x")).unwrap();
    assert_eq!(handler.events.ready_count(), n - 1);
    assert_eq!(handler.events.in_flight_count(), 1);

    service(&event_loop);
    assert_eq!(handler.events.ready_count(), n);
    assert_eq!(handler.events.in_flight_count(), 0);
    assert_eq!(handler.received.lock()[0].payload(), b"x");
}

#[test]
fn deferred_slot_stays_in_flight_until_restored() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 64);
    let n = handler.events.capacity();
    handler.defer.store(true, Ordering::SeqCst);

    handler.events.enqueue(&MqMsg::from("a")).unwrap();
    handler.events.enqueue(&MqMsg::from("b")).unwrap();
    service(&event_loop);
    assert_eq!(handler.events.in_flight_count(), 2);

    let deferred = handler.deferred.lock().clone();
    assert_eq!(deferred.len(), 2);

    handler.events.restore_message(deferred[0], true).unwrap();
    assert_eq!(handler.events.ready_count(), n - 1);

    handler.events.restore_message(deferred[1], false).unwrap();
    assert_eq!(handler.events.ready_count(), n);
}

// A failed verified restore is an error in release builds and an assertion
// in debug builds.
#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "is not a deferred member"))]
fn stale_verified_restore_is_rejected() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 64);
    let n = handler.events.capacity();
    handler.defer.store(true, Ordering::SeqCst);

    handler.events.enqueue(&MqMsg::from("a")).unwrap();
    service(&event_loop);
    let handle = handler.deferred.lock()[0];
    handler.events.restore_message(handle, true).unwrap();

    let err = handler.events.restore_message(handle, true).unwrap_err();
    assert!(matches!(err, MqError::IllegalArgument { .. }));
    assert_eq!(handler.events.ready_count(), n);
}

#[test]
fn stale_unverified_restore_leaves_in_flight_slot_alone() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 2, 16);
    let n = handler.events.capacity();
    assert_eq!(n, 2);

    handler.defer.store(true, Ordering::SeqCst);
    handler.events.enqueue(&MqMsg::from("a")).unwrap();
    service(&event_loop);
    let stale = handler.deferred.lock()[0];
    handler.events.restore_message(stale, true).unwrap();

    // Both slots go in flight again, one of them the slot `stale` named.
    handler.events.enqueue(&MqMsg::from("b")).unwrap();
    handler.events.enqueue(&MqMsg::from("c")).unwrap();
    assert_eq!(handler.events.in_flight_count(), n);

    let err = handler.events.restore_message(stale, false).unwrap_err();
    assert!(matches!(err, MqError::IllegalArgument { .. }));
    assert_eq!(handler.events.ready_count(), 0);
    assert_eq!(handler.events.in_flight_count(), n);

    let err = handler.events.enqueue(&MqMsg::from("d")).unwrap_err();
    assert!(matches!(err, MqError::NotReady { .. }));

    handler.defer.store(false, Ordering::SeqCst);
    service(&event_loop);
    let payloads: Vec<Vec<u8>> = handler.received.lock().iter().map(|m| m.payload().to_vec()).collect();
    assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(handler.events.ready_count(), n);
}

#[test]
fn panicking_handler_releases_slot_and_loop_continues() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 16);
    let n = handler.events.capacity();

    handler.events.enqueue(&MqMsg::from("boom")).unwrap();
    handler.events.enqueue(&MqMsg::from("after")).unwrap();
    assert_eq!(event_loop.run_pending().unwrap(), 2);

    assert_eq!(handler.events.ready_count(), n);
    assert_eq!(handler.events.in_flight_count(), 0);
    let received = handler.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload(), b"after");
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "is not a deferred member"))]
fn restore_from_foreign_pool_is_rejected() {
    let event_loop = Loop::new();
    let first = recorder(&event_loop, 2, 16);
    let second = recorder(&event_loop, 2, 16);
    first.defer.store(true, Ordering::SeqCst);

    first.events.enqueue(&MqMsg::from("mine")).unwrap();
    service(&event_loop);
    let handle = first.deferred.lock()[0];

    let err = second.events.restore_message(handle, true).unwrap_err();
    assert!(matches!(err, MqError::IllegalArgument { .. }));
    assert_eq!(second.events.ready_count(), second.events.capacity());

    first.events.restore_message(handle, true).unwrap();
    assert_eq!(first.events.ready_count(), first.events.capacity());
}

#[test]
fn close_quorum_fires_once() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 16, 16);
    let n = handler.events.capacity();

    handler.events.enqueue(&MqMsg::from("before close")).unwrap();
    handler.events.enqueue_close().unwrap();
    service(&event_loop);

    assert_eq!(handler.events.closed_count(), n);
    assert!(handler.events.is_close_done());
    assert_eq!(handler.close_done_calls.load(Ordering::SeqCst), 1);
    assert_eq!(event_loop.alive_handles(), 0);
    assert_eq!(handler.received.lock().len(), 1);
}

#[test]
fn failed_wakeup_rolls_back_slot() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 16);
    let n = handler.events.capacity();

    handler.events.close_async_msgs();
    let err = handler.events.enqueue(&MqMsg::from("late")).unwrap_err();
    assert!(matches!(err, MqError::Closing));
    assert_eq!(handler.events.ready_count(), n);
    assert_eq!(handler.events.in_flight_count(), 0);
}

#[test]
fn oversized_message_is_rejected() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 4, 8);

    handler.events.enqueue(&MqMsg::data(vec![0u8; 8])).unwrap();
    let err = handler.events.enqueue(&MqMsg::data(vec![0u8; 9])).unwrap_err();
    assert!(matches!(err, MqError::MessageTooLarge { size: 9, max: 8 }));
    assert_eq!(handler.events.in_flight_count(), 1);
}

#[test]
fn concurrent_producers_see_exactly_capacity_successes() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 32, 16);
    let n = handler.events.capacity();

    let producers = 8;
    let per_producer = 16;
    assert!(n < producers * per_producer);

    let successes = AtomicUsize::new(0);
    let not_ready = AtomicUsize::new(0);
    thread::scope(|s| {
        for p in 0..producers {
            let handler = &handler;
            let successes = &successes;
            let not_ready = &not_ready;
            s.spawn(move || {
                for i in 0..per_producer {
                    match handler.events.enqueue(&MqMsg::data(vec![p as u8, i as u8])) {
                        Ok(()) => successes.fetch_add(1, Ordering::SeqCst),
                        Err(MqError::NotReady { .. }) => not_ready.fetch_add(1, Ordering::SeqCst),
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                }
            });
        }
    });

    assert_eq!(successes.load(Ordering::SeqCst), n);
    assert_eq!(not_ready.load(Ordering::SeqCst), producers * per_producer - n);

    service(&event_loop);
    assert_eq!(handler.events.ready_count(), n);
    handler.events.enqueue(&MqMsg::from("recycled")).unwrap();
}

#[test]
fn per_producer_order_is_preserved() {
    let event_loop = Loop::new();
    let handler = recorder(&event_loop, 64, 16);

    for i in 0..50u8 {
        handler.events.enqueue(&MqMsg::data(vec![i])).unwrap();
    }
    service(&event_loop);

    let received = handler.received.lock();
    let order: Vec<u8> = received.iter().map(|m| m.payload()[0]).collect();
    assert_eq!(order, (0..50u8).collect::<Vec<_>>());
}
