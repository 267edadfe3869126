use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum FavTreeError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Navigation error: {0}")]
    Navigation(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Graph query failed: {0}")]
    Query(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for FavTreeError {
    fn from(src: toml::de::Error) -> FavTreeError {
        FavTreeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for FavTreeError {
    fn from(src: toml::ser::Error) -> FavTreeError {
        FavTreeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for FavTreeError {
    fn from(src: JsonError) -> FavTreeError {
        FavTreeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for FavTreeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => FavTreeError::NotFound(format!("{x}")),
            _ => FavTreeError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}
