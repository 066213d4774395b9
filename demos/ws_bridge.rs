//! WebSocket front end for a NEETS amplifier.
//!
//! Every connected client receives the current state on connect, then every state
//! change. Client text frames are JSON actions such as `{"action":"volume_up"}`.
//!
//! ```text
//! NEETS_HOST=192.168.10.109 WS_PORT=8080 cargo run --example ws_bridge
//! ```

use futures_util::{SinkExt, StreamExt};
use neets_amp_bridge::{parse_action, AmpBridge, BridgeConfig, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::from_env()?;
    let ws_port: u16 = match std::env::var("WS_PORT") {
        Ok(port) => port.parse()?,
        Err(_) => 8080,
    };

    tracing::info!("Bridging NEETS amp at {}:{}", config.host, config.port);
    let bridge = Arc::new(AmpBridge::start(config)?);

    let listener = TcpListener::bind(("0.0.0.0", ws_port)).await?;
    tracing::info!("WebSocket server listening on port {}", ws_port);

    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                clients.spawn(serve_client(bridge.clone(), stream, addr));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    clients.shutdown().await;
    match Arc::try_unwrap(bridge) {
        Ok(bridge) => bridge.shutdown().await,
        Err(_) => tracing::warn!("Bridge still shared at shutdown"),
    }
    Ok(())
}

async fn serve_client(bridge: Arc<AmpBridge>, stream: TcpStream, addr: SocketAddr) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    tracing::info!("Client connected: {}", addr);

    let (mut sink, mut incoming) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: everything sent to this client goes through `tx`
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut subscription = bridge.subscribe().await;
    let subscription_id = subscription.id();
    let _ = tx.send(ServerMessage::state_update(&bridge.state().await));
    let _ = tx.send(ServerMessage::ConnectionStatus(bridge.connection_status().await));

    let events_tx = tx.clone();
    let events = tokio::spawn(async move {
        while let Ok(event) = subscription.recv().await {
            if events_tx.send(ServerMessage::from_event(&event)).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = incoming.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Client {} read error: {}", addr, e);
                break;
            }
        };

        let reply = match parse_action(&text) {
            Ok(action) => match bridge.submit(action).await {
                Ok(reply) => ServerMessage::from_reply(&reply),
                Err(e) => ServerMessage::from_error(&e),
            },
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", addr, e);
                ServerMessage::from_error(&e)
            }
        };
        if tx.send(reply).is_err() {
            break;
        }
    }

    bridge.unsubscribe(subscription_id).await;
    events.abort();
    drop(tx);
    let _ = writer.await;
    tracing::info!("Client disconnected: {}", addr);
}
