use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockSpaceError {
    #[error("Space full: no free blocks available")]
    SpaceFull,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid block ID: {0}")]
    InvalidBlockId(u64),

    #[error("Allocator used before recovery completed")]
    NotInitialized,

    #[error("Allocator already initialized")]
    AlreadyInitialized,

    #[error("Allocator initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Corrupt recovery bitmap: {0}")]
    CorruptBitmap(String),

    #[error("No eviction candidate was accepted")]
    EvictionExhausted,

    #[error("Entry is already tracked by the eviction policy")]
    AlreadyTracked,

    #[error("Entry is not tracked by the eviction policy")]
    NotTracked,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, BlockSpaceError>;
