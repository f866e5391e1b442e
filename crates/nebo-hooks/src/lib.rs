//! Hook dispatch for the Nebo platform.
//!
//! Apps subscribe to well-known junctions of the agent loop as filters
//! (payload-transforming, sequential, may short-circuit) or actions
//! (fire-and-forget). The dispatcher orders subscribers by priority,
//! applies a hard 500 ms per-call deadline, and latches a per-app
//! circuit open after three consecutive failures — until that app's
//! process restarts and re-registers.

pub mod circuit;
pub mod dispatcher;
pub mod subscription;

pub use circuit::{CircuitState, MAX_CONSECUTIVE_FAILURES};
pub use dispatcher::{HookDispatcher, HOOK_CALL_TIMEOUT};
pub use subscription::HookSubscription;
