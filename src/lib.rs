//! Rust library for bridging a NEETS Amp 2:25 amplifier to network clients
//!
//! This library keeps a persistent TCP connection to a NEETS amplifier, mirrors its
//! state, and exposes an async API for controlling it. It supports:
//!
//! - Automatic reconnection with exponential backoff
//! - Power, source, volume and mute control
//! - Mix mode, mix volume and mix mute
//! - Per-input gain trims and three-band output EQ
//! - Press-and-hold repeat for level controls
//! - Periodic status polling
//! - Real-time state update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use neets_amp_bridge::{Action, AmpBridge, BridgeConfig, BridgeEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads NEETS_HOST, NEETS_PORT and POLL_INTERVAL
//!     let bridge = AmpBridge::start(BridgeConfig::from_env()?)?;
//!
//!     // Subscribe to state updates
//!     let mut updates = bridge.subscribe().await;
//!
//!     // Wait for the first connected state
//!     while let Ok(event) = updates.recv().await {
//!         if let BridgeEvent::State(state) = event {
//!             if state.connected {
//!                 break;
//!             }
//!         }
//!     }
//!
//!     // Control the amplifier
//!     bridge.submit(Action::PowerOn).await?;
//!     bridge.submit(Action::SourceSelect { source: 2 }).await?;
//!     bridge.submit(Action::VolumeSet { value: -25 }).await?;
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # JSON Clients
//!
//! Transports that speak JSON can use [`parse_action`] and [`ServerMessage`]:
//!
//! ```no_run
//! use neets_amp_bridge::{parse_action, AmpBridge, ServerMessage};
//!
//! # async fn handle(bridge: &AmpBridge, text: &str) -> neets_amp_bridge::Result<String> {
//! let reply = match parse_action(text) {
//!     Ok(action) => match bridge.submit(action).await {
//!         Ok(reply) => ServerMessage::from_reply(&reply),
//!         Err(e) => ServerMessage::from_error(&e),
//!     },
//!     Err(e) => ServerMessage::from_error(&e),
//! };
//! reply.to_json()
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Bridge**: Public handle owning the background tasks
//! - **Scheduler**: Action planning, delayed confirms, holds and polls
//! - **Connection**: Socket lifecycle and reconnect backoff
//! - **Codec**: Record framing on the TCP byte stream
//! - **Interpreter**: Device records into state field deltas
//! - **State**: Mirrored device state
//! - **Notifier**: Fan-out of state changes to subscribers
//! - **Message**: JSON message structures for clients

mod action;
mod bridge;
mod codec;
mod config;
mod connection;
mod error;
mod interpreter;
mod message;
mod notifier;
mod protocol;
mod scheduler;
mod state;
mod types;

// Public exports
pub use action::{Action, HoldControl, Reply, Step, StepTarget};
pub use bridge::AmpBridge;
pub use codec::{encode, feed, RecordBuffer};
pub use config::{BridgeConfig, HoldTiming, ReconnectPolicy};
pub use connection::{ConnectionStatus, LinkState};
pub use error::{BridgeError, Result};
pub use interpreter::{interpret, Field, FieldDelta, FieldValue};
pub use message::{parse_action, ServerMessage, StateView};
pub use notifier::{BridgeEvent, Subscription, SubscriptionId};
pub use protocol::Command;
pub use scheduler::CommandSequence;
pub use state::{DeviceState, StateStore};
pub use types::{
    db_label, Db, DbRange, Direction, EqBand, InputIndex, GAIN_RANGE, INPUT_COUNT, SOURCE_RANGE,
    VOLUME_RANGE,
};
