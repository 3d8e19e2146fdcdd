// shardctl - Shard map control plane
// Routing metadata for horizontally partitioned tables

#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod keys;
pub mod registry;
pub mod shard_map;
pub mod splitter;
pub mod storage;

// Re-exports for convenience
pub use catalog::ShardCatalog;
pub use config::{Config, ConfigLoader, StoreBackend, StoreConfig};
pub use endpoint::{DatabaseRecord, Endpoint, ShardRoute};
pub use keys::{Access, Role, ShardId};
pub use registry::ServerRecord;
pub use shard_map::ShardMap;
pub use splitter::{ShardState, SplitOutcome};
pub use storage::{FileStore, MemoryStore, MetadataStore};

/// Size of the record key hash space. Every shard map tiles `[0, MODULO)`.
pub const MODULO: u32 = 65536;

/// shardctl error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Unknown server: {0}")]
        UnknownServer(String),

        #[error("Unknown database: {0} has no master assigned")]
        UnknownDatabase(String),

        #[error("Corrupt shard map: {0}")]
        CorruptShardMap(String),

        #[error("Route not found: {0}")]
        RouteNotFound(String),

        #[error("Shard not found: {0}")]
        ShardNotFound(String),

        #[error("Malformed input: {0}")]
        MalformedInput(String),

        #[error("Sharding is not enabled for table {0}")]
        ShardingDisabled(String),

        #[error("Invalid split: {0}")]
        InvalidSplit(String),

        #[error("Concurrent modification: {0}")]
        ConcurrentModification(String),

        #[error("Wrong value type at key {key}: expected {expected}")]
        WrongType { key: String, expected: &'static str },

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        #[error("Configuration error: {0}")]
        Config(#[from] config::ConfigError),
    }

    impl Error {
        /// Errors caused by operator input rather than store state.
        pub fn is_user_error(&self) -> bool {
            matches!(
                self,
                Error::MalformedInput(_) | Error::ShardNotFound(_) | Error::InvalidSplit(_)
            )
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
