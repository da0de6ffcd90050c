//! Bundlesync - content bundle provisioning
//!
//! This library downloads, extracts and reconciles a local content bundle
//! (a game installation directory) against remote sources without
//! destroying user-owned state such as settings files and user-installed
//! add-ons.
//!
//! The building blocks are usable on their own:
//!
//! - [`download`]: whole-file and chunked parallel downloads
//! - [`reconcile`]: archive extraction into a live directory
//! - [`items`]: item-list synchronization
//! - [`cleanup`]: orphan removal for a managed folder
//! - [`runtime`]: versioned runtime installation
//!
//! [`Engine`] wires them together for a [`ManagedBundle`].

pub mod bundle;
pub mod cancel;
pub mod cleanup;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fswalk;
pub mod items;
pub mod logging;
pub mod progress;
pub mod provision;
pub mod reconcile;
pub mod runtime;
pub mod transfer;

#[cfg(test)]
mod testutil;

pub use bundle::{ManagedBundle, PreloadItem};
pub use cancel::CancellationToken;
pub use config::{ConfigFile, ConfigKey, EngineConfig};
pub use engine::Engine;
pub use error::{ProvisionError, ProvisionResult, TransferError};
pub use progress::{ProgressEvent, ProgressSink};
pub use provision::{ProvisionReport, Provisioner};
