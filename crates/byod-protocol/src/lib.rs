//! Wire types for the BYOD host agent.
//!
//! These are the JSON shapes exchanged with the fleet scheduler, the accounts
//! service, the local tunnel helper and WebDriver clients. The agent crate owns
//! all behaviour; this crate only describes data.

pub mod account;
pub mod apps;
pub mod device;
pub mod fleet;
pub mod tunnel;
pub mod webdriver;

pub use account::{BearerUserDetails, Organization, UserDetails};
pub use apps::{ActionStatus, AppAction, AppInfo, AppRequest, AppResponse, ValidationRequest};
pub use device::{DeviceRecord, DeviceStatus, Platform};
pub use fleet::{FleetSnapshot, HostType};
pub use tunnel::{TunnelData, TunnelInfo};
pub use webdriver::{
    AlwaysMatch, Capabilities, DesiredCapabilities, NEW_COMMAND_TIMEOUT_SECS, NewSessionPayload,
    SessionValue, TestInfo, session_id_from_body,
};
