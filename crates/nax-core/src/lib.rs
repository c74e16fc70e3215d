//! Live state mirror for DM NAX devices, built on `nax-api`.
//!
//! - **[`NaxClient`]** : Facade managing the full lifecycle:
//!   [`login()`](NaxClient::login) authenticates over HTTP,
//!   [`upgrade_to_stream()`](NaxClient::upgrade_to_stream) opens the
//!   WebSocket stream and spawns the task that feeds incoming fragments
//!   into the store. A dropped stream is retried forever until
//!   [`logout()`](NaxClient::logout).
//!
//! - **[`StateStore`]** : The merged state document plus path and
//!   connection subscription registries. Callbacks run on the stream task,
//!   outside any lock.
//!
//! - **Paths** ([`path`]) : Dotted addresses into the document
//!   (`Device.ZoneOutputs.Zones.Zone01.ZoneAudio.Volume`), with helpers to
//!   enumerate, resolve, and nest them.
//!
//! - **[`merge()`]** : The deep-merge rule applied to every fragment.

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod merge;
pub mod path;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ConnectionState, NaxClient, WriteRoute};
pub use config::{ClientConfig, ReconnectConfig, TlsVerification};
pub use device::DeviceInfo;
pub use error::CoreError;
pub use merge::{Document, merge};
pub use path::{DataPath, PathError};
pub use store::{ConnectionCallback, DataCallback, StateStore, SubscriptionId};
