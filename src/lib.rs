// src/lib.rs
// Library surface shared by the binaries and integration tests.

pub mod analyze;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod watch;

pub use crate::api::router;
pub use crate::notify::{NotificationKind, NotifierMux};
pub use crate::watch::{Platform, Supervisor, SupervisorHandle};
