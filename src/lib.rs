//! A reconnecting SIP-over-WebSocket softphone client library.
//!
//! The [`Client`] registers an account with a SIP registrar over a secure
//! websocket, places and receives calls as [`Session`]s, and rides out
//! transient network loss with a jittered, environment-gated recovery
//! loop. SIP parsing is delegated to `rsip`; the media plane and the
//! host's online/visibility signals are injected behind narrow traits so
//! browser glue and tests plug in the same way.

pub type Result<T> = std::result::Result<T, crate::error::Error>;
pub use crate::error::Error;

pub mod backoff;
pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod session;
pub mod stack;
pub mod transport;
pub mod useragent;

pub use client::Client;
pub use config::{AccountConfig, ClientOptions, DeviceTemplate, MediaConfig, TransportSettings};
pub use environment::{Environment, EnvironmentController, Features};
pub use session::{Session, SessionState, TransferTarget};
pub use transport::ClientStatus;
