use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::registry::RouteRegistry;
use super::route::{Channel, Route};
use super::{Broker, Deliverer};
use crate::config::BrokerSettings;
use crate::protocol::{AckPolicy, AckStatus, Command, Endpoint, Rejection, Request};
use crate::utils::RegistryError;

/// Accepts connections forever and forwards every payload it reads.
async fn spawn_sink() -> (Endpoint, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if stream.read_to_end(&mut buf).await.is_ok() {
                    let _ = tx.send(buf);
                }
            });
        }
    });
    (endpoint, rx)
}

/// Replies to every payload with `prefix` + payload.
async fn spawn_transformer(prefix: &'static [u8]) -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).await.unwrap();
                let mut reply = prefix.to_vec();
                reply.extend_from_slice(&buf);
                stream.write_all(&reply).await.unwrap();
            });
        }
    });
    endpoint
}

/// An endpoint nobody listens on.
async fn dead_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    drop(listener);
    endpoint
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("sink closed")
}

fn fast_settings() -> BrokerSettings {
    BrokerSettings {
        connect_timeout_ms: 500,
        transform_timeout_ms: 500,
        ..BrokerSettings::default()
    }
}

fn registry_with_channel() -> RouteRegistry {
    let mut registry = RouteRegistry::new();
    registry.add_route("r1").unwrap();
    registry.add_channel("r1", "c1").unwrap();
    registry
}

#[test]
fn test_route_new() {
    let route = Route::new("r1");
    assert_eq!(route.name, "r1");
    assert!(route.channels.is_empty());
}

#[test]
fn test_channel_subscribe_is_idempotent() {
    let mut channel = Channel::new("c1");
    let endpoint = Endpoint::new("127.0.0.1", 5500);
    assert!(channel.subscribe(endpoint.clone()));
    assert!(!channel.subscribe(endpoint.clone()));
    assert_eq!(channel.subscribers.len(), 1);

    assert!(channel.unsubscribe(&endpoint));
    assert!(!channel.unsubscribe(&endpoint));
}

#[test]
fn test_channel_keeps_transformer_order() {
    let mut channel = Channel::new("c1");
    let a = Endpoint::new("a", 1);
    let b = Endpoint::new("b", 2);
    channel.add_transformer(a.clone());
    channel.add_transformer(b.clone());
    assert!(!channel.add_transformer(a.clone()));
    assert_eq!(channel.transformers, vec![a.clone(), b.clone()]);

    assert!(channel.remove_transformer(&a));
    assert_eq!(channel.transformers, vec![b]);
}

#[test]
fn test_add_route_then_exists() {
    let mut registry = RouteRegistry::new();
    assert!(!registry.route_exists("r1"));
    registry.add_route("r1").unwrap();
    assert!(registry.route_exists("r1"));
    assert_eq!(
        registry.add_route("r1"),
        Err(RegistryError::DuplicateRoute("r1".to_string()))
    );
}

#[test]
fn test_routes_are_listed_sorted() {
    let mut registry = RouteRegistry::new();
    registry.add_route("zeta").unwrap();
    registry.add_route("alpha").unwrap();
    assert_eq!(registry.routes(), vec!["alpha", "zeta"]);
}

#[test]
fn test_add_channel_errors() {
    let mut registry = RouteRegistry::new();
    assert_eq!(
        registry.add_channel("r1", "c1"),
        Err(RegistryError::UnknownRoute("r1".to_string()))
    );

    registry.add_route("r1").unwrap();
    registry.add_channel("r1", "c1").unwrap();
    assert!(registry.channel_exists("r1", "c1"));
    assert_eq!(
        registry.add_channel("r1", "c1"),
        Err(RegistryError::DuplicateChannel {
            route: "r1".to_string(),
            channel: "c1".to_string()
        })
    );

    // channel names are scoped to their route
    registry.add_route("r2").unwrap();
    registry.add_channel("r2", "c1").unwrap();
}

#[test]
fn test_add_subscriber_requires_route_and_channel() {
    let mut registry = RouteRegistry::new();
    let endpoint = Endpoint::new("127.0.0.1", 5500);

    assert_eq!(
        registry.add_subscriber("r1", "c1", endpoint.clone()),
        Err(RegistryError::UnknownRoute("r1".to_string()))
    );
    registry.add_route("r1").unwrap();
    assert_eq!(
        registry.add_subscriber("r1", "c1", endpoint.clone()),
        Err(RegistryError::UnknownChannel {
            route: "r1".to_string(),
            channel: "c1".to_string()
        })
    );

    registry.add_channel("r1", "c1").unwrap();
    assert_eq!(registry.add_subscriber("r1", "c1", endpoint.clone()), Ok(true));
    assert_eq!(registry.add_subscriber("r1", "c1", endpoint.clone()), Ok(false));
    let resolved = registry.resolve("r1", "c1").unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved.contains(&endpoint));
}

#[test]
fn test_remove_subscriber() {
    let mut registry = registry_with_channel();
    let endpoint = Endpoint::new("127.0.0.1", 5500);
    registry.add_subscriber("r1", "c1", endpoint.clone()).unwrap();

    assert_eq!(registry.remove_subscriber("r1", "c1", &endpoint), Ok(true));
    assert_eq!(registry.remove_subscriber("r1", "c1", &endpoint), Ok(false));
    assert!(registry.resolve("r1", "c1").unwrap().is_empty());
    assert!(registry.remove_subscriber("r1", "nope", &endpoint).is_err());
}

#[test]
fn test_plan_covers_every_channel_without_a_channel() {
    let mut registry = registry_with_channel();
    registry.add_channel("r1", "c0").unwrap();
    registry
        .add_subscriber("r1", "c1", Endpoint::new("h", 2))
        .unwrap();
    registry
        .add_subscriber("r1", "c1", Endpoint::new("h", 1))
        .unwrap();
    registry
        .add_transformer("r1", "c0", Endpoint::new("t", 9))
        .unwrap();

    let plans = registry.plan("r1", None).unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].channel, "c0");
    assert_eq!(plans[0].transformers, vec![Endpoint::new("t", 9)]);
    assert_eq!(
        plans[1].subscribers,
        vec![Endpoint::new("h", 1), Endpoint::new("h", 2)]
    );

    let single = registry.plan("r1", Some("c1")).unwrap();
    assert_eq!(single.len(), 1);
    assert!(registry.plan("missing", None).is_err());
    assert!(registry.plan("r1", Some("missing")).is_err());
}

#[tokio::test]
async fn test_delivery_survives_unreachable_subscriber() {
    let mut registry = registry_with_channel();
    let (a, mut rx_a) = spawn_sink().await;
    let (b, mut rx_b) = spawn_sink().await;
    let dead = dead_endpoint().await;
    for endpoint in [a.clone(), dead.clone(), b.clone()] {
        registry.add_subscriber("r1", "c1", endpoint).unwrap();
    }

    let deliverer = Deliverer::new(&fast_settings());
    let plans = registry.plan("r1", None).unwrap();
    let report = deliverer.deliver("r1", &plans, b"hello").await;

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, dead);
    assert_eq!(recv(&mut rx_a).await, b"hello");
    assert_eq!(recv(&mut rx_b).await, b"hello");
}

#[tokio::test]
async fn test_delivery_with_no_subscribers_is_empty() {
    let registry = registry_with_channel();
    let deliverer = Deliverer::new(&fast_settings());
    let plans = registry.plan("r1", None).unwrap();
    let report = deliverer.deliver("r1", &plans, b"nobody").await;
    assert!(report.is_empty());
    assert_eq!(report.route, "r1");
}

#[tokio::test]
async fn test_transformers_rewrite_payload_in_order() {
    let mut registry = registry_with_channel();
    let (sink, mut rx) = spawn_sink().await;
    let first = spawn_transformer(b"1-").await;
    let dead = dead_endpoint().await;
    let second = spawn_transformer(b"2-").await;
    registry.add_subscriber("r1", "c1", sink).unwrap();
    for transformer in [first, dead, second] {
        registry.add_transformer("r1", "c1", transformer).unwrap();
    }

    let deliverer = Deliverer::new(&fast_settings());
    let plans = registry.plan("r1", Some("c1")).unwrap();
    let report = deliverer.deliver("r1", &plans, b"msg").await;

    assert_eq!(report.delivered.len(), 1);
    // the dead transformer is skipped
    assert_eq!(recv(&mut rx).await, b"2-1-msg");
}

#[tokio::test]
async fn test_oversized_transformer_reply_keeps_payload() {
    let mut registry = registry_with_channel();
    let (sink, mut rx) = spawn_sink().await;
    let bloated = spawn_transformer(b"far-too-long-prefix-").await;
    registry.add_subscriber("r1", "c1", sink).unwrap();
    registry.add_transformer("r1", "c1", bloated).unwrap();

    let settings = BrokerSettings {
        max_frame_len: 8,
        ..fast_settings()
    };
    let deliverer = Deliverer::new(&settings);
    let plans = registry.plan("r1", Some("c1")).unwrap();
    let report = deliverer.deliver("r1", &plans, b"msg").await;

    assert_eq!(report.delivered.len(), 1);
    assert_eq!(recv(&mut rx).await, b"msg");
}

#[tokio::test]
async fn test_process_registry_commands() {
    let broker = Broker::new(&fast_settings());

    let ack = broker
        .process(Request::new(
            "me",
            Command::AddRoute {
                route: "r1".to_string(),
            },
        ))
        .await;
    assert_eq!(ack.ack, AckStatus::Accepted);
    assert!(broker.registry().route_exists("r1"));

    let duplicate = Request::new(
        "me",
        Command::AddRoute {
            route: "r1".to_string(),
        },
    );
    let uid = duplicate.uid.clone();
    let ack = broker.process(duplicate).await;
    assert_eq!(ack.uid, uid);
    assert_eq!(
        ack.ack,
        AckStatus::Rejected(Rejection::Registry(RegistryError::DuplicateRoute(
            "r1".to_string()
        )))
    );
}

#[tokio::test]
async fn test_process_on_sent_acks_before_delivery() {
    let broker = Broker::new(&fast_settings());
    let (sink, mut rx) = spawn_sink().await;
    broker.apply(&Command::AddRoute { route: "r1".to_string() }).unwrap();
    broker
        .apply(&Command::AddChannel {
            route: "r1".to_string(),
            channel: "c1".to_string(),
        })
        .unwrap();
    broker
        .apply(&Command::AddSubscriber {
            route: "r1".to_string(),
            channel: "c1".to_string(),
            endpoint: sink,
        })
        .unwrap();

    let request = Request::new(
        "me",
        Command::SendMessage {
            route: "r1".to_string(),
            channel: None,
            payload: b"payload".to_vec(),
        },
    );
    let uid = request.uid.clone();
    let ack = broker.process(request).await;

    assert_eq!(ack.uid, uid);
    assert_eq!(ack.ack, AckStatus::Accepted);
    assert_eq!(recv(&mut rx).await, b"payload");
}

#[tokio::test]
async fn test_process_on_delivered_reports_counts() {
    let broker = Broker::new(&fast_settings());
    let (sink, mut rx) = spawn_sink().await;
    let dead = dead_endpoint().await;
    broker.apply(&Command::AddRoute { route: "r1".to_string() }).unwrap();
    broker
        .apply(&Command::AddChannel {
            route: "r1".to_string(),
            channel: "c1".to_string(),
        })
        .unwrap();
    for endpoint in [sink, dead] {
        broker
            .apply(&Command::AddSubscriber {
                route: "r1".to_string(),
                channel: "c1".to_string(),
                endpoint,
            })
            .unwrap();
    }

    let mut request = Request::new(
        "me",
        Command::SendMessage {
            route: "r1".to_string(),
            channel: Some("c1".to_string()),
            payload: b"counted".to_vec(),
        },
    );
    request.ack_policy = AckPolicy::OnDelivered;
    let ack = broker.process(request).await;

    assert_eq!(
        ack.ack,
        AckStatus::Delivered {
            delivered: 1,
            failed: 1
        }
    );
    assert_eq!(recv(&mut rx).await, b"counted");
}

#[tokio::test]
async fn test_process_rejects_message_for_unknown_route() {
    let broker = Broker::default();
    let ack = broker
        .process(Request::new(
            "me",
            Command::SendMessage {
                route: "ghost".to_string(),
                channel: None,
                payload: Vec::new(),
            },
        ))
        .await;
    assert_eq!(
        ack.ack,
        AckStatus::Rejected(Rejection::Registry(RegistryError::UnknownRoute(
            "ghost".to_string()
        )))
    );
}

#[tokio::test]
async fn test_process_shutdown_flips_signal() {
    let broker = Broker::default();
    let signal = broker.shutdown_signal();
    assert!(!*signal.borrow());

    let ack = broker.process(Request::new("me", Command::Shutdown)).await;
    assert!(ack.ack.is_positive());
    assert!(broker.is_shutting_down());
    assert!(*signal.borrow());
}
