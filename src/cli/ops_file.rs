use crate::model::Operation;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsFileError {
    #[error("failed to read operations file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse operations file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Either a bare array of operations or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum OpsDocument {
    List(Vec<Operation>),
    Batch { operations: Vec<Operation> },
}

/// Read a JSON batch of operations, keeping file order.
pub fn read_operations(path: &Path) -> Result<Vec<Operation>, OpsFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| OpsFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_operations(&text).map_err(|source| OpsFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_operations(text: &str) -> Result<Vec<Operation>, serde_json::Error> {
    let operations = match serde_json::from_str(text)? {
        OpsDocument::List(operations) => operations,
        OpsDocument::Batch { operations } => operations,
    };
    Ok(operations)
}
