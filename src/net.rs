use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async;
use tungstenite::Message;
use uuid::Uuid;

use track_physics::track_sim::VehicleInput;

use crate::state::{Command, SharedGameState};

/// Client -> server, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input {
        #[serde(default)]
        throttle: f32,
        /// + steers right, as seen by the driver
        #[serde(default)]
        steer: f32,
        #[serde(default)]
        handbrake: bool,
    },
    Shift { up: bool },
    SelectGear { index: usize },
    Debug { enabled: bool },
    Ping,
}

/// Server -> client control messages. Snapshots are built in state.rs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { player_id: String },
    Pong,
}

impl ClientMessage {
    pub fn from_json(txt: &str) -> Option<Self> {
        serde_json::from_str(txt).ok()
    }
}

/// Client steering is driver-relative (+ right); the core yaws + left.
pub fn vehicle_input(throttle: f32, steer: f32, handbrake: bool) -> VehicleInput {
    VehicleInput::new(throttle, -steer, handbrake).clamped()
}

pub async fn start_websocket_server(addr: String, state: Arc<Mutex<SharedGameState>>) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding websocket listener on {addr}"))?;

    info!("websocket listening on ws://{addr}");

    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(raw, state).await {
                warn!("connection {peer}: {e:#}");
            }
        });
    }
}

async fn handle_connection(raw: TcpStream, state: Arc<Mutex<SharedGameState>>) -> Result<()> {
    let ws = accept_async(raw).await.context("websocket handshake")?;
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Outgoing channel + send loop
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let player_id = Uuid::new_v4().to_string();

    state.lock().await.register_client(&player_id, tx.clone());

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    info!("player connected: {player_id}");
    send(&tx, &ServerMessage::Welcome { player_id: player_id.clone() });

    // -------------------------------
    // 2) Main receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!("read error from {player_id}: {e}");
                break;
            }
        };
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        let Some(parsed) = ClientMessage::from_json(text) else {
            debug!("ignoring message from {player_id}: {text}");
            continue;
        };

        match parsed {
            ClientMessage::Ping => send(&tx, &ServerMessage::Pong),
            ClientMessage::Input { throttle, steer, handbrake } => {
                state.lock().await.update_input(&player_id, vehicle_input(throttle, steer, handbrake));
            }
            ClientMessage::Shift { up } => {
                state.lock().await.push_command(&player_id, Command::Shift { up });
            }
            ClientMessage::SelectGear { index } => {
                state.lock().await.push_command(&player_id, Command::SelectGear(index));
            }
            ClientMessage::Debug { enabled } => {
                state.lock().await.push_command(&player_id, Command::Debug(enabled));
            }
        }
    }

    info!("player disconnected: {player_id}");
    state.lock().await.remove_client(&player_id);
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => warn!("failed to encode {msg:?}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_client_messages() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"input","throttle":0.5,"steer":-1.0}"#),
            Some(ClientMessage::Input { throttle: 0.5, steer: -1.0, handbrake: false })
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"select_gear","index":3}"#),
            Some(ClientMessage::SelectGear { index: 3 })
        );
        assert_eq!(ClientMessage::from_json(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
        assert_eq!(ClientMessage::from_json(r#"{"type":"fly"}"#), None);
    }

    #[test]
    fn server_messages_carry_type_tag() {
        let json = serde_json::to_string(&ServerMessage::Welcome { player_id: "p".into() }).unwrap();
        assert_eq!(json, r#"{"type":"welcome","player_id":"p"}"#);
        assert_eq!(serde_json::to_string(&ServerMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn right_steer_becomes_negative_yaw_input() {
        let input = vehicle_input(2.0, 1.0, true);
        assert_eq!(input.throttle, 1.0);
        assert_eq!(input.steering, -1.0);
        assert!(input.handbrake);
    }
}
