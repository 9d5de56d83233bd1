//! Long-running tasks started once the session is established.
//!
//! Each task runs on its own timer and never waits on another one. The pollers swallow their
//! errors; the refresh monitor returns its error so the process can stop.

pub mod poller;
pub mod refresh_monitor;

pub use poller::{Poller, TickOutcome};
pub use refresh_monitor::{CHECK_INTERVAL, run_refresh_monitor};
