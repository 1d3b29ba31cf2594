// src/watch/mod.rs
//! Polling side: platform adapters, the dedup window, the per-platform loop
//! and the supervisor that starts and stops loops.

pub mod dedup;
pub mod engine;
pub mod providers;
pub mod supervisor;
pub mod types;

pub use dedup::DedupWindow;
pub use engine::{CycleReport, LoopExit, Phase, WatchContext, WatchLoop, WatchPolicy};
pub use supervisor::{Command, LoopState, LoopStatus, SettingsApplied, Supervisor, SupervisorHandle};
pub use types::{Finding, Platform, Post, PostSource, WatchedAccount};
