use std::{collections::BTreeMap, process::Command};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{parse_combined_json, CompileError, ContractDefinition};

/// Environment variable naming the `solc` binary to run.
pub const SOLC_PATH_ENV: &str = "SOLBENCH_SOLC_PATH";

/// Handle to a `solc` executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solc {
    program: Utf8PathBuf,
    optimize: bool,
}

impl Default for Solc {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Solc {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            optimize: false,
        }
    }

    /// Uses `$SOLBENCH_SOLC_PATH`, falling back to `solc` on `PATH`.
    pub fn from_env() -> Self {
        let program = std::env::var(SOLC_PATH_ENV).unwrap_or_else(|_| "solc".to_string());
        Self::new(program)
    }

    pub fn with_optimizer(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    pub fn optimize(&self) -> bool {
        self.optimize
    }

    /// Last non-empty line of `solc --version`.
    pub fn version(&self) -> Result<String, CompileError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|source| CompileError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CompileError::Diagnostics(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    pub fn is_available(&self) -> bool {
        self.version().is_ok()
    }

    /// Compiles one source file and returns every contract solc emitted for it,
    /// including contracts pulled in through imports.
    pub fn compile(
        &self,
        source: &Utf8Path,
    ) -> Result<BTreeMap<String, ContractDefinition>, CompileError> {
        let mut command = Command::new(&self.program);
        command.args(["--combined-json", "abi,bin,bin-runtime"]);
        if self.optimize {
            command.arg("--optimize");
        }
        command.arg(source.as_str());

        tracing::debug!(target: "solc", "running {:?}", command);
        let output = command.output().map_err(|source| CompileError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let diagnostics = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(CompileError::Diagnostics(diagnostics));
        }
        if !stderr.trim().is_empty() {
            tracing::warn!(target: "solc", "{source}: {}", stderr.trim());
        }

        let definitions = parse_combined_json(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!(
            target: "solc",
            "compiled {source}: {} contract(s)",
            definitions.len()
        );
        Ok(definitions)
    }
}
