//! playbind: state propagation and component registry for media players.
//!
//! Components live in an explicit [`host::Host`] tree. Shared state flows
//! down through [`context::Context`] providers and consumers, descendants
//! bind to ancestor managers through [`discovery`], and the
//! [`bridge::MediaBridge`] forwards a player's traffic to whichever media
//! engine is mounted inside it, buffering commands in a
//! [`queue::RequestQueue`] until one is.

pub mod bridge;
pub mod config;
pub mod context;
pub mod controls;
pub mod discovery;
pub mod disposal;
pub mod host;
pub mod queue;
pub mod simulate;
