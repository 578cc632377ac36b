//! Unit provisioning, workload supervision and maintenance scheduling.

pub mod installer;
pub mod maintenance;
pub mod power;
pub mod schedule;
pub mod status;
pub mod supervisor;
pub mod systemd;
pub mod unit;
pub mod workload;

pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
