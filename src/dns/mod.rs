//! Virtual Peer Names
//!
//! Peers can be addressed by virtual host names instead of IP addresses:
//!
//! - `<name>.<name-suffix>`: a peer by its announced name
//! - `<hash>.<hash-suffix>`: a peer by its hash (base64, or hex of the hash bytes)
//!
//! Either form may carry one leading subdomain (`www.alpha.yacy`), which is
//! kept as a path suffix of the resolved address. A comma-separated list of
//! such names, each optionally pinned to `=<ip>[:<port>]`, defines a cluster.

mod cluster;
mod resolver;

pub use cluster::ClusterMap;
pub use resolver::PeerNameResolver;
