//! Per-layer error types, following the teacher's convention of one `enum`
//! per protocol boundary with `Display` + `std::error::Error` + `From`
//! conversions rather than a single crate-wide error type.

pub mod cluster;
pub mod config;
pub mod dns;
pub mod http;
