//! Security modes and per-channel security configuration

pub mod config;
pub mod mode;

pub use config::SecurityConfiguration;
pub use mode::{MessageSecurityMode, SecurityMode};
