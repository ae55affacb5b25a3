//! Fleet synchronisation with the remote scheduler.
//!
//! Snapshots identify the host by its tunnel identifier, which comes from the
//! LT tunnel helper this module launches. Every sync is fire-and-forget:
//! failures are logged by the caller and never retried, except the bounded
//! tunnel-identifier lookup.

mod client;
mod error;
mod sync;
mod tunnel;

pub use client::{FleetApi, HttpFleetClient};
pub use error::{FleetError, FleetResult};
pub use sync::{FleetSync, outbound_ip, run_heartbeat};
pub use tunnel::{TunnelIdentity, TunnelManager};
