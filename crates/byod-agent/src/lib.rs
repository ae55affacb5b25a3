//! BYOD Agent Library
//!
//! Exposes the mobile devices attached to this host as WebDriver endpoints
//! and keeps the remote fleet informed about them.

pub mod api;
pub mod auth;
pub mod automation;
pub mod config;
pub mod context;
pub mod db;
pub mod discovery;
pub mod download;
pub mod fleet;
pub mod lease;
pub mod paths;
pub mod supervisor;
pub mod tools;
