//! App process runtime for the Nebo platform.
//!
//! Turns an installed app directory into a supervised child process:
//! sanitized environment, vetted binary, own process group, log tee,
//! unix-socket bring-up, gRPC dial with per-capability typed clients,
//! launch-time health check, and a dedicated reaper so that exactly one
//! `wait` ever runs per process.

pub mod clients;
pub mod env;
pub mod error;
pub mod health;
pub mod logs;
pub mod orphan;
pub mod process;
pub mod record;
pub mod runtime;
pub mod socket;

pub use clients::CapabilityClients;
pub use error::{RuntimeError, RuntimeResult};
pub use record::AppProcess;
pub use runtime::AppRuntime;
