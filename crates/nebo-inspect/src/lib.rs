//! Live observation of app gRPC traffic.
//!
//! A bounded ring of structured events plus a set of subscriber channels.
//! Recording is lock-held but O(1); fan-out uses non-blocking sends, so a
//! slow subscriber loses events and never stalls a producer. A
//! subscriber-count atomic gates all instrumentation — with no
//! subscribers, callers skip payload marshaling entirely.

pub mod event;
pub mod payload;
pub mod ring;

pub use event::{Direction, EventType, InspectorEvent};
pub use payload::marshal;
pub use ring::{Inspector, InspectorSubscription};
