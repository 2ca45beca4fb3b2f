pub mod config;
pub mod database;
pub mod host_probe;
pub mod in_memory;
pub mod membership;
pub mod metrics;
pub mod notifier;
pub mod random;
pub mod resource_monitor;
pub mod scheduler;
pub mod telemetry;
