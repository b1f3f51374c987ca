//! CLI command definitions and the `serve` orchestration that wires the
//! core components (config, refresh driver, DNS server, HTTP API) into one
//! running process. The leader watcher (`crate::leader::watch_leader`) is
//! not invoked here: no concrete `CoordinationService` is wired up, so the
//! refresh driver runs on its periodic timer alone. See DESIGN.md's Open
//! Question decisions.

pub mod base;
