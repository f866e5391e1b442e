//! Wire types and gRPC stubs for the Nebo app capability services.
//!
//! The host dials `unix://<dir>/app.sock` and creates typed clients only
//! for the capabilities an app's manifest declares. The `.proto` source
//! lives under `proto/`; `v1` is the checked-in generated code so builds
//! need no protoc step. Messages carry `serde::Serialize` derives (via
//! `type_attribute`) for generic-JSON marshaling, and `json` holds their
//! hand-maintained canonical protobuf-JSON forms for the inspector.

pub mod json;
pub mod v1;

#[cfg(unix)]
pub mod uds;

pub use json::ProtoJson;
