//! KratOs Seed Registry
//!
//! Peer registry core for KratOs nodes. Every known peer ("seed") is kept in
//! one of three persistent tables according to its reachability, peers can
//! be looked up by name or address, and the active table can be published
//! as a seed list and verified against its published copy.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    KRATOS SEED REGISTRY                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SeedRegistry      ←── active / passive / potential tables   │
//! │  SeedTable         ←── RocksDB store, reset on corruption    │
//! │  LookupIndex       ←── name and address caches               │
//! │  SeedEnum          ←── sorted and rotating traversal         │
//! │  SyncProtocol      ←── publish, download, verify seed lists  │
//! │  PeerNameResolver  ←── <name>.yacy / <hash>.yacyh, clusters  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod distribution;
pub mod dns;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::RegistryConfig;
pub use registry::{RegistryError, SeedRegistry};
pub use types::{Seed, SeedHash};
