//! WhatsApp bridge plugin
//!
//! The plugin object the chat host drives, and everything behind it:
//! - **Host seam** (`host`) - the slice of the host API the plugin calls, plus an in-memory host
//! - **Hooks** (`hooks`) - one method per host event, implemented by `Plugin`
//! - **Application** (`app`, `webhook`, `preferences`) - sessions, channels, WhatsApp ingestion
//! - **Interactions** (`commands`, `autocomplete`, `dialogs`, `actions`) - slash commands,
//!   autocomplete trees, dialogs, buttons
//! - **Background** (`job`, `reaction_webhook`, `session_track`) - periodic job, outbound
//!   reaction notifications, websocket session tracking
//!
//! # Flow
//!
//! ```text
//! Host event → PluginHooks → Plugin → WhatsappApp → Session/Channel stores
//!                              ↓
//!                          HostApi (posts, channels, KV, websocket events)
//! ```

pub mod actions;
pub mod app;
pub mod autocomplete;
pub mod commands;
pub mod dialogs;
pub mod hooks;
pub mod host;
pub mod job;
pub mod plugin;
pub mod preferences;
pub mod reaction_webhook;
pub mod session_track;
pub mod support;
pub mod webhook;

pub use app::{UserSessionsClosed, WhatsappApp};
pub use hooks::{ChannelMember, HookVerdict, PluginHooks, TeamMember};
pub use host::{HostApi, HostError, InMemoryHost};
pub use plugin::{Plugin, PluginError, PluginOptions};
pub use webhook::{IngestReport, WebhookPayload};
