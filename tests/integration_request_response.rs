//! Request/response round trips and the two ways a request can fail to
//! resolve with a value: no subscriber, and a subscriber that never replies
//! in time.

use messaging_core::bus::CorrelationId;
use messaging_core::{Bus, BusConfig, BusError, Container, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn test_bus() -> Bus {
    Bus::new(BusConfig::builder().worker_count(4))
}

#[tokio::test]
async fn request_resolves_with_the_handlers_reply() {
    let bus = Arc::new(test_bus());
    let bus_for_handler = Arc::clone(&bus);

    bus.subscribe("math/add", move |_topic, container, _trace| {
        let a = container.get_value("a").to_int().unwrap_or(0);
        let b = container.get_value("b").to_int().unwrap_or(0);
        let correlation_id = container.get_value("__correlation_id").to_string_value().unwrap();
        let correlation_id = CorrelationId(Uuid::parse_str(&correlation_id).unwrap());

        let mut reply = Container::new();
        reply.add("sum", Value::Int32(a + b));
        bus_for_handler.reply(correlation_id, reply)
    })
    .unwrap();

    let mut request = Container::new();
    request.add("a", Value::Int32(2));
    request.add("b", Value::Int32(3));

    let result = bus.request("math/add", request, Duration::from_secs(1)).await.unwrap();
    assert_eq!(result.get_value("sum"), Value::Int32(5));
}

#[tokio::test]
async fn request_with_no_subscriber_fails_immediately() {
    let bus = test_bus();
    let started = std::time::Instant::now();

    let result = bus.request("slow/topic", Container::new(), Duration::from_millis(100)).await;

    assert_eq!(result, Err(BusError::NoSubscriber));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn request_with_an_unresponsive_subscriber_times_out() {
    let bus = test_bus();
    bus.subscribe("slow/topic", |_topic, _container, _trace| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    })
    .unwrap();

    let started = std::time::Instant::now();
    let result = bus.request("slow/topic", Container::new(), Duration::from_millis(100)).await;

    assert_eq!(result, Err(BusError::Timeout(Duration::from_millis(100))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(400));
}
