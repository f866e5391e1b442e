//! App registry for the Nebo platform.
//!
//! Turns launched app processes into host-visible capability adapters,
//! and owns everything around that lifecycle: discovery at startup, the
//! install pipeline with staged permission-gated updates, quarantine and
//! uninstall, developer sideloading, the crash supervisor, the hourly
//! revocation sweep, and the filesystem watcher.

pub mod adapters;
pub mod error;
pub mod install;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod watcher;

pub use adapters::{AppAdapters, GatewayAdapter, HostBridges, SettingsBridge, ToolAdapter, UiAdapter};
pub use error::{RegistryError, RegistryResult};
pub use install::InstallPipeline;
pub use registry::{permitted_capabilities, AppRegistry, QUARANTINE_MARKER};
pub use store::{StatusRow, StatusStore};
pub use supervisor::{backoff_for_attempt, RestartState, Supervisor};
pub use watcher::AppWatcher;
