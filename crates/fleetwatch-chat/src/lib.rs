//! Chat-side transport, outbound dispatcher, and command/approval loop.
//!
//! `fleetwatch-core` only ever emits [`fleetwatch_core::orchestrator::OrchestratorEvent`]s;
//! this crate owns every piece of operator-facing text, rendering those
//! events and command replies through [`dispatch::ChatDispatcher`].

pub mod bot_type;
pub mod command;
pub mod dispatch;
pub mod transport;

pub use bot_type::BotType;
pub use command::{CallbackData, CommandRouter, Outcome, PendingApproval, RunRegistry};
pub use dispatch::{ChatDispatcher, SendOptions};
pub use transport::{BotTransport, InboundUpdate, PollingTransport, WebhookTransport};
