//! Structured error types for prof-agent
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these cross the instrumentation hot path: failures there are
//! logged and the affected data is dropped.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Failed to create buffer file in {dir}: {source}")]
    CreateFailed {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to size buffer file {path} to {size} bytes: {source}")]
    ResizeFailed {
        path: PathBuf,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map buffer file {path}: {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Buffer file is not open")]
    NotOpen,

    #[error("Chunk of {len} bytes does not fit the {capacity}-byte buffer")]
    ChunkTooLarge { len: usize, capacity: usize },

    #[error("Invalid dump range {start}..{end} for a {len}-byte buffer")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("Remote transport failed: {0}")]
    Transport(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Unknown profiling point handler kind: {0}")]
    UnknownKind(String),

    #[error("Handler {kind} rejected its configuration {info:?}: {reason}")]
    InvalidInfo { kind: String, info: String, reason: String },

    #[error("Handler tables differ in length: {ids} ids, {kinds} kinds, {infos} infos")]
    LengthMismatch { ids: usize, kinds: usize, infos: usize },

    #[error("Heap dump to {path} failed: {source}")]
    HeapDumpFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for runtime setup
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
