//! Per-device automation servers.
//!
//! Each attached device gets at most one Appium process, listening on the
//! port leased to that device. Processes start on the first session for a
//! device and stop when that session is deleted; the lease itself outlives
//! the process so the device keeps its port for the rest of the run.

mod process;

pub use process::{ProcessHandle, ProcessManager};
