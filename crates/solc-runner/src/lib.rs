//! Compiler boundary: turns Solidity sources into [`ContractDefinition`]s by running
//! `solc --combined-json`, and keeps them in a [`ContractRegistry`] keyed by contract name.
mod definition;
mod registry;
mod solc;

pub use definition::{parse_combined_json, ContractDefinition};
pub use registry::ContractRegistry;
pub use solc::{Solc, SOLC_PATH_ENV};

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("solc reported errors:\n{0}")]
    Diagnostics(String),
    #[error("failed to run solc at `{program}`: {source}")]
    Spawn {
        program: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid compiler output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("contract `{contract}` has no `{field}` in compiler output")]
    MissingBytecode {
        contract: String,
        field: &'static str,
    },
    #[error("contract `{contract}` has invalid bytecode: {reason}")]
    InvalidBytecode { contract: String, reason: String },
}
