//! Core types and operations for ralph-admin
//!
//! ralph loops report their progress by writing one JSON descriptor per
//! session into a shared registry directory (`$TMPDIR/ralph-sessions/` by
//! default). This crate turns that directory into a live view of the fleet:
//!
//! - [`store`] enumerates, parses, patches, and deletes descriptor files
//! - [`process`] probes pid liveness and delivers control signals
//! - [`registry`] classifies, deduplicates, and orders sessions, and runs the
//!   stop / pause / resume lifecycle actions
//! - [`tail`] reads bounded excerpts of the live log and the progress file
//!
//! Every registry call re-derives its view from disk. Nothing is cached
//! between calls, so the external workers and this crate can share the
//! directory under last-writer-wins semantics.

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod process;
pub mod registry;
pub mod session;
pub mod store;
pub mod tail;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use process::{ControlSignal, OsProcessControl, ProcessControl, SignalTarget};
pub use registry::{ListReport, Registry, Removal, RemovalReason, StopOutcome};
pub use session::{DeclaredStatus, Descriptor, DisplayStatus, SessionRecord};
pub use store::DescriptorStore;
