//! The DNS listener: authoritative managed-zone answers plus a recursion
//! pipeline for everything outside the managed zone.

pub mod recursion;
pub mod server;
