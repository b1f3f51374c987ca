//! DNS-based service-discovery gateway for a cluster workload manager:
//! a record generator driven by periodic cluster-state snapshots, served
//! authoritatively over DNS with recursive fallback, plus a read-only HTTP
//! JSON API and a frame-stream log-tap broadcast bus.

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod dns;
pub mod error;
pub mod framestream;
pub mod http;
pub mod ipresolve;
pub mod leader;
pub mod mangle;
pub mod master;
pub mod ports;
pub mod records;
pub mod refresh;
pub mod snapshot;
