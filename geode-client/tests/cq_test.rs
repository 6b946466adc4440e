//! Continuous queries over a scripted subscription channel.

mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use common::{bool_object, config_for, eventually, message, object, single_chunk, MockServer};
use geode_client::core::protocol::{MessageType, Part};
use geode_client::core::{CacheableValue, GeodeError};
use geode_client::{
    ClientConfig, CqAttributes, CqEvent, CqOperation, CqState, FnCqListener, GeodeClient,
};

const QUERY: &str = "SELECT * FROM /Portfolios p WHERE p.status = 'active'";

fn cq_server() -> common::Responder {
    Arc::new(|request| match request.header().kind().ok()? {
        MessageType::ExecuteCq | MessageType::StopCq | MessageType::CloseCq => {
            Some(single_chunk(MessageType::Reply, &[Part::int(0)]))
        }
        _ => None,
    })
}

fn subscription_config(servers: &[&MockServer]) -> ClientConfig {
    let base = config_for(servers);
    ClientConfig::builder()
        .pool(|p| {
            p.servers(base.pool().servers().to_vec())
                .connect_timeout(base.pool().connect_timeout())
                .read_timeout(base.pool().read_timeout())
                .subscription_enabled(true)
        })
        .build()
        .unwrap()
}

fn entry_notification(kind: MessageType, key: i32, value: &str, cqs: &[(&str, i32)]) -> Bytes {
    let mut parts = vec![Part::string("/Portfolios"), object(&CacheableValue::Int(key))];
    if matches!(kind, MessageType::LocalCreate | MessageType::LocalUpdate) {
        parts.push(bool_object(false));
        parts.push(object(&CacheableValue::from(value)));
    }
    parts.push(object(&CacheableValue::Null));
    parts.push(Part::bytes(Bytes::new()));
    parts.push(bool_object(false));
    parts.push(bool_object(true));
    parts.push(Part::int(cqs.len() as i32 * 2));
    for (name, op) in cqs {
        parts.push(Part::string(name));
        parts.push(Part::int(*op));
    }
    parts.push(Part::bytes(vec![7u8; 16]));
    message(kind, &parts)
}

fn region_destroyed(cq: &str) -> Bytes {
    message(
        MessageType::LocalDestroyRegion,
        &[
            Part::string("/Portfolios"),
            object(&CacheableValue::Null),
            bool_object(true),
            Part::int(2),
            Part::string(cq),
            Part::int(MessageType::DestroyRegion.code()),
            Part::bytes(vec![7u8; 16]),
        ],
    )
}

fn recording_attributes() -> (CqAttributes, Arc<Mutex<Vec<CqEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener = FnCqListener::builder()
        .on_event(move |event| sink.lock().unwrap().push(event.clone()))
        .build();
    let attributes = CqAttributes::builder()
        .add_listener(Arc::new(listener))
        .build();
    (attributes, events)
}

#[tokio::test]
async fn test_cq_requires_subscription() {
    let server = MockServer::start(cq_server()).await;
    let client = GeodeClient::connect(config_for(&[&server])).await.unwrap();

    let err = client
        .cq_service()
        .new_cq("portfolios", QUERY, CqAttributes::default(), false)
        .unwrap_err();
    assert!(matches!(err, GeodeError::IllegalState(_)));

    client.shutdown().await;
}

#[tokio::test]
async fn test_cq_lifecycle_and_events() {
    let server = MockServer::start(cq_server()).await;
    let client = GeodeClient::connect(subscription_config(&[&server])).await.unwrap();
    assert!(server.handshakes().iter().any(|d| *d != common::DATA_CHANNEL));

    let (attributes, events) = recording_attributes();
    let cq = client
        .cq_service()
        .new_cq("portfolios", QUERY, attributes, false)
        .unwrap();
    assert_eq!(cq.state(), CqState::Stopped);

    cq.execute().await.unwrap();
    assert_eq!(cq.state(), CqState::Running);
    let executed = server.requests_of(MessageType::ExecuteCq);
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].parts()[0].as_string().unwrap(), "portfolios");

    server.push(entry_notification(
        MessageType::LocalCreate,
        1,
        "active",
        &[("portfolios", MessageType::LocalCreate.code())],
    ));
    server.push(entry_notification(
        MessageType::LocalDestroy,
        1,
        "",
        &[("portfolios", MessageType::LocalDestroy.code())],
    ));
    assert!(eventually(|| events.lock().unwrap().len() == 2).await);

    {
        let events = events.lock().unwrap();
        assert_eq!(events[0].query_operation(), CqOperation::Create);
        assert_eq!(events[0].key(), &CacheableValue::Int(1));
        assert_eq!(events[0].new_value(), Some(&CacheableValue::from("active")));
        assert_eq!(events[1].query_operation(), CqOperation::Destroy);
    }
    assert_eq!(cq.statistics().num_inserts(), 1);
    assert_eq!(cq.statistics().num_deletes(), 1);

    cq.stop().await.unwrap();
    assert_eq!(cq.state(), CqState::Stopped);
    assert_eq!(server.requests_of(MessageType::StopCq).len(), 1);

    // stopped queries drop events
    server.push(entry_notification(
        MessageType::LocalUpdate,
        1,
        "closed",
        &[("portfolios", MessageType::LocalUpdate.code())],
    ));

    cq.close().await.unwrap();
    assert!(cq.is_closed());
    assert!(!client.cq_service().contains_cq("portfolios"));
    assert_eq!(server.requests_of(MessageType::CloseCq).len(), 1);
    assert_eq!(events.lock().unwrap().len(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn test_region_destroy_closes_cq() {
    let server = MockServer::start(cq_server()).await;
    let client = GeodeClient::connect(subscription_config(&[&server])).await.unwrap();

    let (attributes, events) = recording_attributes();
    let cq = client
        .cq_service()
        .new_cq("portfolios", QUERY, attributes, false)
        .unwrap();
    cq.execute().await.unwrap();

    server.push(region_destroyed("portfolios"));
    assert!(eventually(|| cq.is_closed()).await);
    assert!(events.lock().unwrap().is_empty());
    assert!(!client.cq_service().contains_cq("portfolios"));
    // closed locally, the server already dropped it
    assert!(server.requests_of(MessageType::CloseCq).is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_registered_cqs() {
    let server = MockServer::start(cq_server()).await;
    let client = GeodeClient::connect(subscription_config(&[&server])).await.unwrap();

    let first = client
        .cq_service()
        .new_cq("first", QUERY, CqAttributes::default(), false)
        .unwrap();
    let second = client
        .cq_service()
        .new_cq("second", QUERY, CqAttributes::default(), false)
        .unwrap();
    first.execute().await.unwrap();

    client.shutdown().await;
    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(!client.cq_service().is_running());
    assert_eq!(client.cq_service().statistics().num_cqs_closed(), 2);
}

fn subscription_handshakes(server: &MockServer) -> usize {
    server
        .handshakes()
        .iter()
        .filter(|d| **d != common::DATA_CHANNEL)
        .count()
}

#[tokio::test]
async fn test_cq_requests_go_to_subscription_endpoint() {
    let primary = MockServer::start(cq_server()).await;
    let other = MockServer::start(cq_server()).await;
    let client = GeodeClient::connect(subscription_config(&[&primary, &other]))
        .await
        .unwrap();
    assert_eq!(subscription_handshakes(&primary), 1);
    assert_eq!(subscription_handshakes(&other), 0);
    assert_eq!(
        client.pool().subscription_endpoints(),
        vec![primary.location.clone()]
    );

    for name in ["cq-1", "cq-2", "cq-3", "cq-4"] {
        let (attributes, _) = recording_attributes();
        let cq = client
            .cq_service()
            .new_cq(name, QUERY, attributes, false)
            .unwrap();
        cq.execute().await.unwrap();
    }

    assert_eq!(primary.requests_of(MessageType::ExecuteCq).len(), 4);
    assert!(other.requests_of(MessageType::ExecuteCq).is_empty());

    // a live channel needs no recovery
    client.recover_subscription().await.unwrap();
    assert_eq!(subscription_handshakes(&primary), 1);
    assert_eq!(primary.requests_of(MessageType::ExecuteCq).len(), 4);

    client.shutdown().await;
}
