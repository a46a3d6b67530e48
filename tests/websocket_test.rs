//! End-to-end WebSocket tests through the proxy using a tungstenite client.

use std::sync::Arc;
use std::time::Duration;

use fortitude::config::Algorithm;
use fortitude::BackendRegistry;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

mod common;

async fn proxy_with_ws_backend() -> (std::net::SocketAddr, fortitude::Shutdown, common::WsBackend) {
    let http = common::start_named_backend("http").await;
    let ws = common::start_ws_echo_backend().await;
    let config = common::proxy_config(Algorithm::Robin, &[http], &[http], ws.addr);
    let (proxy, shutdown) = common::start_proxy(Arc::new(BackendRegistry::new(config).unwrap())).await;
    (proxy, shutdown, ws)
}

async fn open_bridges(proxy: std::net::SocketAddr) -> u64 {
    common::status(proxy).await["websocket_connections"].as_u64().unwrap()
}

#[tokio::test]
async fn messages_are_relayed_both_ways() {
    let (proxy, shutdown, _ws) = proxy_with_ws_backend().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{proxy}/chat")).await.unwrap();

    client.send(Message::text("hello")).await.unwrap();
    assert_eq!(client.next().await.unwrap().unwrap(), Message::text("hello"));

    let big = vec![7u8; 70_000];
    client.send(Message::binary(big.clone())).await.unwrap();
    assert_eq!(client.next().await.unwrap().unwrap(), Message::binary(big));

    shutdown.trigger();
}

#[tokio::test]
async fn proxy_answers_ping_itself() {
    let (proxy, shutdown, _ws) = proxy_with_ws_backend().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{proxy}/chat")).await.unwrap();

    client.send(Message::Ping(b"beat".to_vec().into())).await.unwrap();
    assert_eq!(client.next().await.unwrap().unwrap(), Message::Pong(b"beat".to_vec().into()));

    shutdown.trigger();
}

#[tokio::test]
async fn close_is_echoed_and_bridge_released() {
    let (proxy, shutdown, _ws) = proxy_with_ws_backend().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{proxy}/chat")).await.unwrap();
    assert_eq!(open_bridges(proxy).await, 1);

    client
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })))
        .await
        .unwrap();

    match client.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while open_bridges(proxy).await != 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    shutdown.trigger();
}

#[tokio::test]
async fn handshake_replays_cookie_to_backend() {
    let (proxy, shutdown, ws) = proxy_with_ws_backend().await;

    let mut request = format!("ws://{proxy}/chat").into_client_request().unwrap();
    request.headers_mut().insert("cookie", "session=alice".parse().unwrap());
    let (mut client, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);

    client.send(Message::text("ping?")).await.unwrap();
    client.next().await.unwrap().unwrap();
    assert_eq!(ws.cookies.lock().unwrap().as_slice(), ["session=alice".to_string()]);

    shutdown.trigger();
}

#[tokio::test]
async fn dead_websocket_backend_refuses_upgrade() {
    let http = common::start_named_backend("http").await;
    let dead = common::closed_addr().await;
    let config = common::proxy_config(Algorithm::Robin, &[http], &[http], dead);
    let (proxy, shutdown) = common::start_proxy(Arc::new(BackendRegistry::new(config).unwrap())).await;

    match tokio_tungstenite::connect_async(format!("ws://{proxy}/chat")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 502),
        other => panic!("expected 502, got {:?}", other.map(|(_, r)| r.status())),
    }

    shutdown.trigger();
}

#[tokio::test]
async fn mute_websocket_backend_is_gateway_timeout() {
    let http = common::start_named_backend("http").await;
    let mute = common::start_mute_backend().await;
    let mut config = common::proxy_config(Algorithm::Robin, &[http], &[http], mute);
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 1;
    let (proxy, shutdown) = common::start_proxy(Arc::new(BackendRegistry::new(config).unwrap())).await;

    let attempt = tokio::time::timeout(
        Duration::from_secs(5),
        tokio_tungstenite::connect_async(format!("ws://{proxy}/chat")),
    )
    .await
    .expect("upgrade should be answered once the handshake limit passes");
    match attempt {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 504),
        other => panic!("expected 504, got {:?}", other.map(|(_, r)| r.status())),
    }

    shutdown.trigger();
}
