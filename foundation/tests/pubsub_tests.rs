//! End-to-end publish/subscribe matching.

use ember_foundation::pubsub::{Broker, PubSubError};

use std::sync::Mutex;

#[test]
fn exact_and_wildcard_subscribers_both_fire() {
    let deliveries: Mutex<Vec<(&'static str, Vec<u8>)>> = Mutex::new(Vec::new());
    let exact = |payload: &[u8]| {
        deliveries.lock().unwrap().push(("exact", payload.to_vec()));
    };
    let wildcard = |payload: &[u8]| {
        deliveries.lock().unwrap().push(("wildcard", payload.to_vec()));
    };

    let broker: Broker = Broker::new();
    broker.create("a/b").unwrap();
    broker.subscribe("a/b", &exact).unwrap();
    broker.subscribe("a/+", &wildcard).unwrap();

    broker.publish("a/b", b"X").unwrap();

    let log = deliveries.lock().unwrap();
    assert_eq!(log.len(), 2);
    // Registration order, each receiving the one-byte payload.
    assert_eq!(log[0], ("exact", vec![b'X']));
    assert_eq!(log[1], ("wildcard", vec![b'X']));
}

#[test]
fn topic_lifecycle_round_trip() {
    let broker: Broker = Broker::new();
    broker.create("dev/ota").unwrap();
    broker.destroy("dev/ota").unwrap();
    // Destroy-then-create must succeed again.
    assert_eq!(broker.create("dev/ota"), Ok(()));
}

#[test]
fn multilevel_wildcard_collects_subtree() {
    let seen = Mutex::new(Vec::new());
    let sink = |payload: &[u8]| {
        seen.lock().unwrap().push(payload.to_vec());
    };

    let broker: Broker = Broker::new();
    broker.subscribe("net/#", &sink).unwrap();
    broker.create("net/wifi/up").unwrap();
    broker.create("net/lte/down").unwrap();

    broker.publish("net/wifi/up", b"1").unwrap();
    broker.publish("net/lte/down", b"0").unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);

    // The wildcard filter does not make unconcrete publishes legal.
    assert_eq!(broker.publish("net/#", b"x"), Err(PubSubError::InvalidParam));
}

#[test]
fn counts_reflect_matching_subscriptions() {
    let a = |_: &[u8]| {};
    let b = |_: &[u8]| {};

    let broker: Broker = Broker::new();
    broker.subscribe("power/battery", &a).unwrap();
    broker.subscribe("power/+", &b).unwrap();

    assert_eq!(broker.count("power/battery"), 2);
    assert_eq!(broker.count("power/usb"), 1);
    assert_eq!(broker.count("thermal"), 0);
}
