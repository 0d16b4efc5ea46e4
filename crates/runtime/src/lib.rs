//! Weft runtime: channels, select, and strands for CSP-style concurrency
//!
//! Key pieces:
//! - Channel: typed, optionally buffered conduit between strands; capacity 0
//!   is a rendezvous
//! - Selector: wait on several channel operations at once, commit to exactly
//!   one ready case
//! - Scheduler: thread-per-strand with lifecycle accounting and
//!   condvar-based shutdown
//!
//! Observability (SIGQUIT diagnostics, WEFT_REPORT at-exit report, watchdog)
//! lives behind the default-on `diagnostics` and `report-json` features.

pub mod channel;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod error;
#[cfg(feature = "diagnostics")]
pub mod report;
pub mod scheduler;
pub mod select;
#[cfg(feature = "diagnostics")]
pub mod watchdog;

// Re-export the working surface
pub use channel::Channel;
pub use error::{CloseError, SelectError, SendError, TryRecvError, TrySendError};
pub use select::{Selection, Selector};
