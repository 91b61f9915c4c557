//! Local peer identity
//!
//! The own seed is stored as a single serialized line in its own file. It is
//! loaded once; only a missing or unreadable file leads to a new identity.

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::RegistryError;
use crate::config::{RegistryConfig, PROTOCOL_VERSION};
use crate::types::{PeerType, Seed};

/// Load the own seed from `path`, or generate and persist a new one
pub(crate) fn load_or_create(path: &Path, config: &RegistryConfig) -> Result<Seed, RegistryError> {
    if path.exists() {
        match load(path) {
            Ok(mut seed) => {
                // Address and reachability are re-learned every run
                seed.set_ip("");
                seed.set_peer_type(PeerType::Virgin);
                info!("🔑 Loaded own seed {} ({}) from {}", seed.hash(), seed.name(), path.display());
                return Ok(seed);
            }
            Err(e) => warn!("Own seed file {} unusable ({}), generating a new identity", path.display(), e),
        }
    }

    let seed = Seed::generate_local(config.peer_name.as_deref(), config.local_http_port, PROTOCOL_VERSION);
    save(path, &seed)?;
    info!("🔑 Generated own seed {} ({})", seed.hash(), seed.name());
    Ok(seed)
}

fn load(path: &Path) -> Result<Seed, RegistryError> {
    let content = fs::read_to_string(path)?;
    let line = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| RegistryError::OwnSeed {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        })?;
    Seed::from_line(line).map_err(|e| RegistryError::OwnSeed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Persist the own seed
pub(crate) fn save(path: &Path, seed: &Seed) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = seed.to_line();
    line.push_str("\r\n");
    fs::write(path, line)?;
    Ok(())
}
