//! Device discovery.
//!
//! Every few seconds the watcher lists iOS devices (go-ios) and Android
//! devices (adb), compares the result with the previous poll and reports each
//! change to the fleet as its own delta sync. New devices get a port lease
//! straight away; new iOS devices also get the WebDriverAgent runner.

mod backend;
mod disk_images;
mod ios_tunnel;
mod watcher;

pub use backend::{AndroidBackend, DeviceBackend, IosBackend};
pub use disk_images::DiskImages;
pub use ios_tunnel::IosTunnel;
pub use watcher::{DeviceWatcher, TrackedDevices, Transition, diff};
