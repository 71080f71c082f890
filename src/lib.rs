//! Uptime monitoring engine: per-monitor timers, protocol probes, heartbeat
//! recording and notification fan-out.
pub mod db;
pub mod notifications;
pub mod server;
pub mod service_monitor;
pub mod version;
pub mod web;
