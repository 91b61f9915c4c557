//! KratOs Seed Registry CLI
//!
//! Operator tool around the peer registry of a node: inspect the peer
//! tables, look peers up, resolve virtual peer names, and publish or import
//! seed lists.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use kratos_seed_registry::distribution::{DirectoryUploader, SyncProtocol};
use kratos_seed_registry::dns::PeerNameResolver;
use kratos_seed_registry::types::fields;
use kratos_seed_registry::{RegistryConfig, Seed, SeedRegistry};

/// KratOs Seed Registry - peer tables, lookups and seed lists
#[derive(Parser, Debug)]
#[command(name = "kratos-seed-registry")]
#[command(author = "KratOs Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Peer seed registry for KratOs nodes", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "seed-registry.toml")]
    config: PathBuf,

    /// Directory holding the peer tables (overrides the config file)
    #[arg(short, long)]
    network_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show table sizes and aggregate counters
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the seeds of one table
    List(ListArgs),

    /// Find a peer by name or address
    Lookup {
        /// Peer name, with or without the name suffix
        #[arg(long, conflicts_with = "ip", required_unless_present = "ip")]
        name: Option<String>,

        /// Address the peer announces
        #[arg(long)]
        ip: Option<std::net::IpAddr>,
    },

    /// Resolve a virtual peer name to ip:port
    Resolve { host: String },

    /// Resolve a cluster definition
    Cluster { definition: String },

    /// Upload the seed list and verify the published copy
    Publish {
        /// URL the list is published at
        #[arg(long)]
        url: Option<String>,

        /// Directory the list is copied into
        #[arg(long)]
        upload_dir: Option<PathBuf>,
    },

    /// Add the seeds of a remote seed list as potential peers
    Import {
        #[arg(long)]
        url: String,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(short, long, default_value = "seed-registry.toml")]
        output: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct ListArgs {
    /// active, passive or potential
    #[arg(long, default_value = "active")]
    table: String,

    /// Order by a seed field (LCount, ICount, Uptime, Version, LastSeen)
    #[arg(long)]
    sort: Option<String>,

    #[arg(long)]
    descending: bool,

    /// Only seeds at or above this version (hash order only)
    #[arg(long, default_value = "0")]
    min_version: f64,

    /// Print serialized seed lines instead of a summary
    #[arg(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    if let Command::InitConfig { output } = &args.command {
        RegistryConfig::default().save(output)?;
        info!("📝 Default configuration written to {}", output.display());
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        RegistryConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        RegistryConfig::default()
    };
    let config = match &args.network_root {
        Some(root) => config.with_network_root(root),
        None => config,
    };
    config.validate()?;

    let registry = Arc::new(SeedRegistry::open(config).context("opening seed registry")?);

    let result = run(&registry, args.command).await;

    if let Err(e) = registry.save_own_seed() {
        warn!("Failed to save own seed: {}", e);
    }
    registry.close();
    result
}

async fn run(registry: &Arc<SeedRegistry>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status { json } => print_status(registry, json)?,
        Command::List(list) => print_list(registry, &list)?,
        Command::Lookup { name, ip } => {
            let found = match (name, ip) {
                (Some(name), _) => registry.lookup_by_name(&name),
                (None, Some(ip)) => registry.lookup_by_address(ip, true, true, true),
                (None, None) => None,
            };
            match found {
                Some(seed) => println!("{}", seed.to_line()),
                None => anyhow::bail!("peer not found"),
            }
        }
        Command::Resolve { host } => {
            let resolver = PeerNameResolver::new(registry.clone());
            match resolver.resolve(&host) {
                Some(address) => println!("{}", address),
                None => anyhow::bail!("cannot resolve {}", host),
            }
        }
        Command::Cluster { definition } => {
            let resolver = PeerNameResolver::new(registry.clone());
            for (hash, address) in resolver.cluster_hashes(&definition) {
                println!("{} {}", hash, address.as_deref().unwrap_or("-"));
            }
        }
        Command::Publish { url, upload_dir } => {
            let config = registry
                .config()
                .clone()
                .with_seed_list_url(url)
                .with_upload_dir(upload_dir);
            let url = config.seed_list_url.context("no seed list URL configured")?;
            let dir = config.upload_dir.context("no upload directory configured")?;

            let uploader = DirectoryUploader::new(dir.join(published_file_name(&url)));
            let protocol = SyncProtocol::from_config(registry.clone())?;
            let log = protocol.upload_cache(&uploader, &url).await?;
            info!("✅ Seed list verified: {}", log);
        }
        Command::Import { url } => {
            let protocol = SyncProtocol::from_config(registry.clone())?;
            let added = protocol.load_seed_list(&url).await?;
            println!("{} potential seeds added", added);
        }
        Command::InitConfig { .. } => {}
    }
    Ok(())
}

fn print_status(registry: &SeedRegistry, json: bool) -> anyhow::Result<()> {
    // Make sure the own identity exists before reporting on it
    registry.try_own_seed()?;
    let stats = registry.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("own seed:   {} ({})", stats.own_hash.unwrap_or_default(), stats.own_name.unwrap_or_default());
    println!("active:     {} peers, {} URLs, {} RWIs", stats.active_peers, stats.active_urls, stats.active_rwi);
    println!("passive:    {} peers, {} URLs, {} RWIs", stats.passive_peers, stats.passive_urls, stats.passive_rwi);
    println!("potential:  {} peers, {} URLs, {} RWIs", stats.potential_peers, stats.potential_urls, stats.potential_rwi);
    println!("speed:      {} ppm, {:.2} qpm", stats.active_ppm, stats.active_qpm);
    println!("redundancy: {}{}", stats.redundancy, if stats.dht_idle { " (DHT idle)" } else { "" });
    Ok(())
}

fn print_list(registry: &SeedRegistry, list: &ListArgs) -> anyhow::Result<()> {
    let up = !list.descending;
    let seeds: Box<dyn Iterator<Item = Seed>> = match (list.table.as_str(), list.sort.as_deref()) {
        (table, Some(field)) => {
            if !fields::SORT_FIELDS.contains(&field) {
                anyhow::bail!("cannot sort by {}, expected one of {:?}", field, fields::SORT_FIELDS);
            }
            match table {
                "active" => Box::new(registry.seeds_sorted_connected(up, field)),
                "passive" => Box::new(registry.seeds_sorted_disconnected(up, field)),
                "potential" => Box::new(registry.seeds_sorted_potential(up, field)),
                other => anyhow::bail!("unknown table {}", other),
            }
        }
        ("active", None) => Box::new(registry.seeds_connected(up, false, None, list.min_version)),
        ("passive", None) => Box::new(registry.seeds_disconnected(up, false, None, list.min_version)),
        ("potential", None) => Box::new(registry.seeds_potential(up, false, None, list.min_version)),
        (other, None) => anyhow::bail!("unknown table {}", other),
    };

    for seed in seeds {
        if list.raw {
            println!("{}", seed.to_line());
        } else {
            println!(
                "{} {:<24} {:<22} v{:<6} {:>10} URLs  {}",
                seed.hash(),
                seed.name(),
                seed.public_address().unwrap_or_else(|| "-".to_string()),
                seed.version(),
                seed.url_count(),
                seed.peer_type().as_str()
            );
        }
    }
    Ok(())
}

/// Last path segment of the seed list URL
fn published_file_name(url: &str) -> &Path {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("seed.txt");
    Path::new(name)
}
