//! shardctl - shard map administration
//!
//! Command-line interface over the shard catalog:
//! - Server registry (add, get, hash-list)
//! - Database endpoints (set, get)
//! - Table sharding (enable, list, route, split, state)
//!
//! # Examples
//!
//! ```bash
//! # Register servers
//! shardctl server add --hash srvA host=10.0.0.1 port=5432
//! shardctl server add --hash srvB host=10.0.0.2 port=5432
//!
//! # Assign a database and shard one of its tables
//! shardctl db --name shopA set --master srvA
//! shardctl table --db shopA --name orders enable-sharding
//!
//! # Split the whole range, sending new writes for the upper half to srvB
//! shardctl table --db shopA --name orders split-shard --master srvB --shard-start 0 --shard-end 65536
//!
//! # Where does record 40000 live?
//! shardctl table --db shopA --name orders get-shard --record-key 40000
//! ```

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shardctl::config::{Config, ConfigLoader, StoreBackend};
use shardctl::error::Error;
use shardctl::registry::parse_attr_pairs;
use shardctl::{Endpoint, ShardCatalog};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Shard map and split administration for partitioned tables
#[derive(Parser, Debug)]
#[command(name = "shardctl")]
#[command(version = shardctl::VERSION)]
#[command(about = "Shard map and split administration for partitioned tables", long_about = None)]
struct Cli {
    /// Entity to manage
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "SHARDCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Metadata store backend (overrides configuration)
    #[arg(long, global = true, value_parser = parse_backend)]
    backend: Option<StoreBackend>,

    /// Metadata snapshot path for the file backend (overrides configuration)
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write daily rolling log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage servers in the configuration
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// Manage databases in the configuration
    Db(DbArgs),

    /// Manage tables in the configuration
    Table(TableArgs),

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ServerCommands {
    /// Add or update server data
    Add {
        /// Server hash
        #[arg(long)]
        hash: String,
        /// Server data as <key>=<value>
        #[arg(required = true, num_args = 1..)]
        data: Vec<String>,
    },

    /// Show server data
    Get {
        /// Server hash
        #[arg(long)]
        hash: String,
    },

    /// List registered server hashes
    HashList,
}

#[derive(Args, Debug)]
struct DbArgs {
    /// Database name
    #[arg(long)]
    name: String,

    #[command(subcommand)]
    command: DbCommands,
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Assign the database master and replicas
    Set {
        /// Master server hash
        #[arg(long)]
        master: String,
        /// Replica server hashes
        #[arg(long, num_args = 0..)]
        replicas: Option<Vec<String>>,
    },

    /// Show the database master and replicas
    Get,
}

#[derive(Args, Debug)]
struct TableArgs {
    /// Database name
    #[arg(long)]
    db: String,

    /// Table name
    #[arg(long)]
    name: String,

    #[command(subcommand)]
    command: TableCommands,
}

#[derive(Subcommand, Debug)]
enum TableCommands {
    /// Enable sharding for the table
    EnableSharding,

    /// List the table's shards
    GetShardList {
        /// Also show read/write endpoints of every shard
        #[arg(long)]
        endpoints: bool,
    },

    /// Find the servers of the shard holding a record key
    GetShard {
        /// Record key
        #[arg(long, allow_negative_numbers = true)]
        record_key: i64,
    },

    /// Split a shard in two
    SplitShard {
        /// Write master of the new upper shard
        #[arg(long)]
        master: String,
        /// Write replicas of the new upper shard
        #[arg(long, num_args = 0..)]
        replicas: Option<Vec<String>>,
        /// Start of the shard range
        #[arg(long)]
        shard_start: u32,
        /// End of the shard range
        #[arg(long)]
        shard_end: u32,
    },

    /// Report whether a shard's read path has caught up with its write path
    ShardState {
        /// Start of the shard range
        #[arg(long)]
        shard_start: u32,
        /// End of the shard range
        #[arg(long)]
        shard_end: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

fn parse_backend(s: &str) -> Result<StoreBackend, String> {
    match s {
        "memory" => Ok(StoreBackend::Memory),
        "file" => Ok(StoreBackend::File),
        other => Err(format!("unknown backend '{}' (expected memory or file)", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = setup_logging(&config) {
        eprintln!("error: failed to initialise logging: {:#}", e);
        return ExitCode::from(2);
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let user_error = e
                .downcast_ref::<Error>()
                .is_some_and(Error::is_user_error);
            debug!(error = ?e, user_error, "Command failed");
            eprintln!("error: {:#}", e);
            if user_error {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

/// Layer CLI overrides on top of file and environment configuration
fn resolve_config(cli: &Cli) -> shardctl::error::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;

    if let Some(backend) = cli.backend {
        config.store.backend = backend;
    }
    if let Some(path) = &cli.store_path {
        config.store.path = path.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = Some(dir.clone());
    }
    if cli.no_color {
        config.logging.color = false;
    }
    Ok(config)
}

/// Setup logging to stderr, plus rolling files when a log directory is set
fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let log_level = config
        .logging
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let file_layer = match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "shardctl.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.logging.color)
                .with_target(false),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    if let Commands::Config { command } = &cli.command {
        return config_command(&config, command);
    }

    if config.store.backend == StoreBackend::Memory {
        warn!("Using the memory backend: changes are discarded on exit");
    }
    let catalog = ShardCatalog::open(&config.store)?;

    match cli.command {
        Commands::Server { command } => server_command(&catalog, command, cli.json).await,
        Commands::Db(args) => db_command(&catalog, args, cli.json).await,
        Commands::Table(args) => table_command(&catalog, args, cli.json).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn config_command(config: &Config, command: &ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Server registry commands
async fn server_command(
    catalog: &ShardCatalog,
    command: ServerCommands,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        ServerCommands::Add { hash, data } => {
            let attrs = parse_attr_pairs(&data)?;
            catalog.add_server(&hash, &attrs).await?;
            println!("Server '{}' stored", hash);
            Ok(())
        }
        ServerCommands::Get { hash } => {
            let server = catalog.get_server(&hash).await?;
            if json {
                return print_json(&server);
            }
            match server {
                None => println!("No data found for server '{}'", hash),
                Some(server) => {
                    println!("Server {}:", server.hash);
                    for (key, value) in &server.attrs {
                        println!("  {} = {}", key, value);
                    }
                }
            }
            Ok(())
        }
        ServerCommands::HashList => {
            let hashes = catalog.list_server_hashes().await?;
            if json {
                return print_json(&hashes);
            }
            println!("Registered servers ({})", hashes.len());
            for (index, hash) in hashes.iter().enumerate() {
                println!("{}. {}", index, hash);
            }
            Ok(())
        }
    }
}

/// Database commands
async fn db_command(catalog: &ShardCatalog, args: DbArgs, json: bool) -> anyhow::Result<()> {
    let DbArgs { name, command } = args;
    match command {
        DbCommands::Set { master, replicas } => {
            let replicas = replicas.filter(|r| !r.is_empty());
            catalog
                .set_database(&name, &master, replicas.as_deref())
                .await?;
            println!("Database '{}' stored", name);
            Ok(())
        }
        DbCommands::Get => {
            let db = catalog.get_database(&name).await?;
            if json {
                return print_json(&db);
            }
            match db {
                None => println!("Database '{}' has no master assigned", name),
                Some(db) => {
                    println!("Master: {}", db.master);
                    println!("Replicas: {}", serde_json::to_string(&db.replicas)?);
                }
            }
            Ok(())
        }
    }
}

fn print_endpoint(label: &str, endpoint: &Endpoint) -> anyhow::Result<()> {
    println!("Master server for {}: {}", label, endpoint.master);
    println!(
        "Replica servers for {}: {}",
        label,
        serde_json::to_string(&endpoint.replicas)?
    );
    Ok(())
}

/// Table commands
async fn table_command(catalog: &ShardCatalog, args: TableArgs, json: bool) -> anyhow::Result<()> {
    let TableArgs { db, name, command } = args;
    match command {
        TableCommands::EnableSharding => {
            if catalog.enable_sharding(&db, &name).await? {
                println!("Sharding enabled for table {}.{}", db, name);
            } else {
                println!("Sharding was already enabled for table {}.{}", db, name);
            }
            Ok(())
        }
        TableCommands::GetShardList { endpoints } => {
            if endpoints {
                let routes = catalog.list_shard_routes(&db, &name).await?;
                if json {
                    return print_json(&routes);
                }
                println!("Shards of table {}.{}:", db, name);
                for (index, route) in routes.iter().enumerate() {
                    println!(
                        "{}. [{}, {})  read: {}  write: {}",
                        index + 1,
                        route.shard.start,
                        route.shard.end,
                        route.read,
                        route.write
                    );
                }
                return Ok(());
            }

            let boundaries = catalog.get_shard_map(&db, &name).await?;
            if json {
                return print_json(&boundaries);
            }
            println!("Shards of table {}.{}:", db, name);
            for (index, pair) in boundaries.windows(2).enumerate() {
                println!("{}. [{}, {})", index + 1, pair[0], pair[1]);
            }
            Ok(())
        }
        TableCommands::GetShard { record_key } => {
            let route = catalog.route_key(&db, &name, record_key).await?;
            if json {
                return print_json(&route);
            }
            print_endpoint("reads", &route.read)?;
            print_endpoint("writes", &route.write)?;
            Ok(())
        }
        TableCommands::SplitShard {
            master,
            replicas,
            shard_start,
            shard_end,
        } => {
            let replicas = replicas.filter(|r| !r.is_empty());
            let outcome = catalog
                .split_shard(&db, &name, shard_start, shard_end, &master, replicas.as_deref())
                .await?;
            info!(pivot = outcome.pivot, "Split complete");
            if json {
                return print_json(&outcome);
            }
            println!(
                "Shard [{}, {}) split into [{}, {}) and [{}, {})",
                shard_start,
                shard_end,
                outcome.lower.start,
                outcome.lower.end,
                outcome.upper.start,
                outcome.upper.end
            );
            Ok(())
        }
        TableCommands::ShardState {
            shard_start,
            shard_end,
        } => {
            let state = catalog
                .shard_state(&db, &name, shard_start, shard_end)
                .await?;
            if json {
                return print_json(&state);
            }
            println!("[{}, {}): {}", shard_start, shard_end, state);
            Ok(())
        }
    }
}
