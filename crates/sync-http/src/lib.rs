//! HTTP adapter for the chat sync engine.
//!
//! [`HttpTransport`] implements [`sync_core::ChatTransport`] with `reqwest`
//! against the messages API and reads the `/stream` push channel through
//! `reqwest-eventsource`, mapping each frame with [`push_event_from_frame`].

mod client;
pub mod sse;
mod wire;

pub use client::HttpTransport;
pub use sse::{SseFrame, push_event_from_frame};
