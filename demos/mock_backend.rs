//! Local backends matching `demos/fortitude.json`.
//!
//! ```text
//! cargo run --example mock_backend
//! cargo run -- --config demos/fortitude.json
//! ```

use std::net::SocketAddr;

use axum::{routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

async fn http_backend(name: &'static str, port: u16) {
    let app = Router::new()
        .route("/static/{*file}", get(move || async move { format!("{name}: static content\n") }))
        .fallback(move || async move { format!("{name}: dynamic content\n") });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    println!("{name} listening on http://{addr}");
    axum::serve(listener, app).await.unwrap();
}

async fn ws_echo(port: u16) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    println!("websocket echo listening on ws://{addr}");

    while let Ok((stream, peer)) = listener.accept().await {
        tokio::spawn(async move {
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            println!("websocket client {peer} connected");
            while let Some(Ok(msg)) = ws.next().await {
                if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[tokio::main]
async fn main() {
    tokio::join!(
        http_backend("read-1", 9001),
        http_backend("read-2", 9002),
        http_backend("write-1", 9011),
        ws_echo(9021),
    );
}
