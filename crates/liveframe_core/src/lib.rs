//! # `liveframe_core`
//!
//! Transport-agnostic engine for server-driven live page synchronization.
//!
//! A server process holds per-client session state and per-page render state,
//! executes page-specific event handlers, and pushes minimal idempotent UI
//! deltas over a persistent bidirectional channel. A client-side runtime
//! (shipped by `liveframe_server`) applies those deltas to the live document
//! without losing focus, scroll position, or user-entered form values.
//!
//! The crate is organized around the flow of a single inbound event:
//!
//! 1. [`session::SessionStore`] resolves the durable session identity and its
//!    live channel (at most one per session).
//! 2. [`pipeline::EventPipeline`] builds the handler input, invokes the
//!    external [`handler::PageHandler`], and processes declared commands via
//!    [`command::CommandProcessor`].
//! 3. If the output differs from the cached page state (or the event is a
//!    forced navigation), [`render::DeltaRenderer`] produces a body fragment
//!    plus head metadata, which is emitted to the session's channel.
//!
//! No HTTP or WebSocket types appear here; the server crate adapts this
//! engine to axum.

pub mod command;
pub mod error;
pub mod handler;
pub mod navigate;
pub mod pipeline;
pub mod protocol;
pub mod render;
pub mod session;

pub use error::LiveframeError;
pub use pipeline::EventPipeline;
pub use session::SessionStore;
