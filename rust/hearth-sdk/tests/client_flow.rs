//! Full-engine flows: hydration, event merge, fan-out, optimistic commands
//! and the polling fallback, against a mock hub (WebSocket + REST).

use futures_util::{SinkExt, StreamExt};
use hearth_sdk::{Channel, HearthClient, HearthConfig, Intent};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Socket = WebSocketStream<TcpStream>;

fn test_config() -> HearthConfig {
    HearthConfig {
        reconnect_intervals: vec![Duration::from_millis(10)],
        max_reconnect_attempts: 2,
        auth_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(30),
        ..HearthConfig::default()
    }
}

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Socket) -> Value {
    loop {
        match ws.next().await.expect("socket closed early").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(payload) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

async fn hub_handshake(ws: &mut Socket) {
    send_json(ws, json!({"type": "auth_required"})).await;
    let auth = next_json(ws).await;
    assert_eq!(auth["type"], "auth");
    send_json(ws, json!({"type": "auth_ok"})).await;
    let subscribe = next_json(ws).await;
    assert_eq!(subscribe["type"], "subscribe_events");
    send_json(
        ws,
        json!({"type": "result", "id": subscribe["id"], "success": true}),
    )
    .await;
}

async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn hydrates_merges_events_and_fans_out() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"entity_id": "light.kitchen", "state": "off", "attributes": {"friendly_name": "Kitchen"}},
            {"entity_id": "sensor.hall", "state": "21.5", "attributes": {}}
        ])))
        .mount(&rest)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_go_tx, event_go_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        hub_handshake(&mut ws).await;
        // The test releases the event once hydration has been observed.
        event_go_rx.await.unwrap();
        send_json(
            &mut ws,
            json!({
                "type": "event",
                "id": 1,
                "event": {
                    "event_type": "state_changed",
                    "data": {
                        "entity_id": "light.kitchen",
                        "new_state": {
                            "entity_id": "light.kitchen",
                            "state": "on",
                            "attributes": {"friendly_name": "Kitchen", "brightness": 128},
                        },
                        "old_state": null,
                    }
                }
            }),
        )
        .await;
        while ws.next().await.is_some() {}
    });

    let api_url = Url::parse(&format!("{}/api", rest.uri())).unwrap();
    let client = HearthClient::new(format!("ws://{addr}"), api_url, "secret", test_config());
    timeout(Duration::from_secs(5), client.init())
        .await
        .expect("init hung")
        .unwrap();

    assert!(client.is_connected());
    assert!(!client.is_polling().await);
    assert_eq!(client.store().len().await, 2);
    let kitchen = client.store().get("light.kitchen").await.unwrap();
    assert_eq!(kitchen.state, json!("off"));

    let all_hits = Arc::new(AtomicUsize::new(0));
    let entity_hits = Arc::new(AtomicUsize::new(0));
    {
        let all_hits = all_hits.clone();
        client.router().subscribe(Channel::AllChanges, move |_| {
            all_hits.fetch_add(1, Ordering::SeqCst);
        });
        let entity_hits = entity_hits.clone();
        client
            .router()
            .subscribe(Channel::entity("light.kitchen"), move |change| {
                assert_eq!(change.entity_id, "light.kitchen");
                entity_hits.fetch_add(1, Ordering::SeqCst);
            });
    }

    event_go_tx.send(()).unwrap();

    let store = client.store().clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let store = store.clone();
            async move {
                store
                    .get("light.kitchen")
                    .await
                    .map(|e| e.state == json!("on"))
                    .unwrap_or(false)
            }
        })
        .await,
        "event never reached the store"
    );
    assert_eq!(all_hits.load(Ordering::SeqCst), 1);
    assert_eq!(entity_hits.load(Ordering::SeqCst), 1);

    // Unrelated entities are untouched by the merge.
    let hall = client.store().get("sensor.hall").await.unwrap();
    assert_eq!(hall.state, json!("21.5"));

    client.teardown().await;
}

#[tokio::test]
async fn failed_command_rolls_the_store_back() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"entity_id": "light.kitchen", "state": "off", "attributes": {"brightness": 0}}
        ])))
        .mount(&rest)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&rest)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        hub_handshake(&mut ws).await;
        while ws.next().await.is_some() {}
    });

    let api_url = Url::parse(&format!("{}/api", rest.uri())).unwrap();
    let client = HearthClient::new(format!("ws://{addr}"), api_url, "secret", test_config());
    timeout(Duration::from_secs(5), client.init())
        .await
        .expect("init hung")
        .unwrap();

    let err = client
        .dispatcher()
        .execute(
            "light.kitchen",
            Intent::TurnOn {
                brightness: Some(80),
                hs_color: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("light.kitchen"));

    // The optimistic write is undone; hydrated values are back.
    let kitchen = client.store().get("light.kitchen").await.unwrap();
    assert_eq!(kitchen.state, json!("off"));
    assert_eq!(kitchen.attribute("brightness"), Some(&json!(0)));

    client.teardown().await;
}

#[tokio::test]
async fn unreachable_feed_falls_back_to_polling() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"entity_id": "sensor.hall", "state": "21.5", "attributes": {}}
        ])))
        .mount(&rest)
        .await;

    // Bind and immediately drop to get an address nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api_url = Url::parse(&format!("{}/api", rest.uri())).unwrap();
    let client = HearthClient::new(format!("ws://{addr}"), api_url, "secret", test_config());
    timeout(Duration::from_secs(10), client.init())
        .await
        .expect("init hung")
        .unwrap();

    assert!(!client.is_connected());
    assert!(client.is_polling().await);

    let store = client.store().clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let store = store.clone();
            async move { store.get("sensor.hall").await.is_some() }
        })
        .await,
        "polling never hydrated the store"
    );

    client.teardown().await;
    assert!(!client.is_polling().await);
}
