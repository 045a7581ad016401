//! Decision prioritization proxy for the CrowdSec LAPI.
//!
//! Sits between a firewall bouncer and the LAPI, scoring and truncating the
//! decision set so the bouncer's kernel IP set keeps the highest-value bans
//! instead of overflowing on arbitrary ones.

pub mod auditor;
pub mod config;
pub mod handler;
pub mod health;
pub mod helpers;
pub mod lapi;
pub mod metrics;
pub mod scorer;
