//! Shared types for the Nebo app runtime platform.
//!
//! Everything the platform crates agree on lives here: the validated
//! [`AppId`], the [`Manifest`] model, the permission taxonomy, the
//! capability vocabulary, the hook-point vocabulary, install/registry
//! event payloads, the host-facing capability contracts, and the
//! platform configuration.

pub mod capability;
pub mod config;
pub mod contract;
pub mod error;
pub mod event;
pub mod hook;
pub mod id;
pub mod manifest;
pub mod permission;

pub use capability::Capability;
pub use config::PlatformConfig;
pub use error::{CoreError, CoreResult};
pub use event::{InstallEvent, InstallEventKind, RegistryEvent, SupervisorEvent};
pub use hook::{HookKind, HookPoint, HookSpec, DEFAULT_HOOK_PRIORITY};
pub use id::AppId;
pub use manifest::{Manifest, RuntimeClass, Transport};
pub use permission::{Permission, PermissionPrefix, PermissionSet};
