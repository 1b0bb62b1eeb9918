use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::serve;
use crate::broker::Broker;
use crate::client::process_command;
use crate::config::BrokerSettings;
use crate::protocol::frame::LEGACY_PROTOCOL_VERSION;
use crate::protocol::{AckStatus, Command, Packet, Request, write_packet};
use crate::utils::{MyceliaError, RegistryError, Result};

async fn start_broker() -> (u16, Arc<Broker>, JoinHandle<Result<()>>) {
    let settings = BrokerSettings::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = Arc::new(Broker::new(&settings));
    let handle = tokio::spawn(serve(listener, Arc::clone(&broker), settings));
    (port, broker, handle)
}

#[tokio::test]
async fn test_commands_mutate_broker_registry() {
    let (port, broker, _server) = start_broker().await;

    let ack = process_command(Command::AddRoute { route: "r1".to_string() }, "127.0.0.1", port)
        .await
        .unwrap();
    assert_eq!(ack.ack, AckStatus::Accepted);
    process_command(
        Command::AddChannel {
            route: "r1".to_string(),
            channel: "c1".to_string(),
        },
        "127.0.0.1",
        port,
    )
    .await
    .unwrap();

    assert!(broker.registry().channel_exists("r1", "c1"));
}

#[tokio::test]
async fn test_registry_errors_reach_the_caller() {
    let (port, _broker, _server) = start_broker().await;

    let err = process_command(
        Command::AddChannel {
            route: "missing".to_string(),
            channel: "c1".to_string(),
        },
        "127.0.0.1",
        port,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        MyceliaError::Registry(RegistryError::UnknownRoute(route)) if route == "missing"
    ));
}

#[tokio::test]
async fn test_legacy_requests_are_applied_without_ack() {
    let (port, broker, _server) = start_broker().await;

    let mut request = Request::new("127.0.0.1", Command::AddRoute { route: "old".to_string() });
    request.version = LEGACY_PROTOCOL_VERSION;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    write_packet(&mut stream, &Packet::Request(request)).await.unwrap();
    stream.shutdown().await.unwrap();

    // the broker closes without writing anything back
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert!(broker.registry().route_exists("old"));
}

#[tokio::test]
async fn test_undecodable_request_is_rejected() {
    let (port, _broker, _server) = start_broker().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // well framed, but object type 77 does not exist
    let body: &[u8] = &[
        2, 77, 1, 1, 0, 0, 0, 0, 1, b'u', 0, 1, b'a', 0, 0, 0, 0, 0, 0,
    ];
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut reply = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut reply).await.unwrap();

    let Packet::Ack(ack) = Packet::decode(&reply).unwrap() else {
        panic!("expected an ack");
    };
    assert!(!ack.ack.is_positive());
}

#[tokio::test]
async fn test_shutdown_command_stops_server() {
    let (port, broker, server) = start_broker().await;

    process_command(Command::Shutdown, "127.0.0.1", port)
        .await
        .unwrap();
    assert!(broker.is_shutting_down());

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
