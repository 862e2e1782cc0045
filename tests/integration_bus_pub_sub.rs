//! Basic pub/sub and wildcard fan-out delivery through a running `Bus`.

use messaging_core::{Bus, BusConfig, Container, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_bus() -> Bus {
    Bus::new(BusConfig::builder().worker_count(4))
}

#[tokio::test]
async fn subscriber_is_invoked_exactly_once_with_published_container() {
    let bus = test_bus();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    bus.subscribe("sensor/*/temp", move |_topic, container, _trace| {
        *seen_clone.lock().unwrap() = Some(container.get_value("value"));
        Ok(())
    })
    .unwrap();

    let mut container = Container::new();
    container.add("value", Value::Double(22.5));
    bus.publish("sensor/room1/temp", container).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock().unwrap(), Some(Value::Double(22.5)));
    assert_eq!(bus.stats().delivered, 1);
}

#[tokio::test]
async fn overlapping_wildcard_patterns_each_fire_once() {
    let bus = test_bus();
    let hash_root = Arc::new(AtomicUsize::new(0));
    let hash_room = Arc::new(AtomicUsize::new(0));
    let exact = Arc::new(AtomicUsize::new(0));

    for (pattern, counter) in [
        ("sensor/#", Arc::clone(&hash_root)),
        ("sensor/room1/#", Arc::clone(&hash_room)),
        ("sensor/room1/temp", Arc::clone(&exact)),
    ] {
        bus.subscribe(pattern, move |_topic, _container, _trace| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }

    let receipt = bus.publish("sensor/room1/temp", Container::new()).unwrap();
    assert_eq!(receipt.expected_delivery_count, 3);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(hash_root.load(Ordering::SeqCst), 1);
    assert_eq!(hash_room.load(Ordering::SeqCst), 1);
    assert_eq!(exact.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().delivered, 3);
}

#[tokio::test]
async fn publish_with_no_matching_subscriber_reports_zero_expected() {
    let bus = test_bus();
    bus.subscribe("sensor/room1/temp", |_topic, _container, _trace| Ok(())).unwrap();

    let receipt = bus.publish("sensor/room2/temp", Container::new()).unwrap();
    assert_eq!(receipt.expected_delivery_count, 0);
}
