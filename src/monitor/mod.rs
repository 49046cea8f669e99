//! Status sources: gateway process, host vitals, session activity, mesh
//! reachability, scheduled jobs, and the gateway's own config.

pub mod gateway_config;
pub mod host;
pub mod jobs;
pub mod process;
pub mod reachability;
pub mod sessions;
pub mod timestamp;
