use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chain::{accounts::MAX_ACCOUNTS, AccountsError, ChainOptions, U256};
use serde::{Deserialize, Deserializer};
use solc_runner::Solc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid harness config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid harness config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Accounts(#[from] AccountsError),
}

/// Harness settings, usually read from a `solbench.toml`.
///
/// ```toml
/// solc = "/usr/local/bin/solc-0.8.24"
/// optimize = true
/// gas_limit = 30000000
/// initial_balance = "1000 ether"
/// accounts = 4
/// default_signer = 0
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Compiler binary. Falls back to `$SOLBENCH_SOLC_PATH`, then `solc`.
    pub solc: Option<Utf8PathBuf>,
    pub optimize: bool,
    pub gas_limit: u64,
    /// Genesis balance of every account: an integer number of wei, or a string such
    /// as `"100 ether"`, `"5 gwei"` or `"0x56bc75e2d63100000"`.
    #[serde(deserialize_with = "deserialize_wei")]
    pub initial_balance: U256,
    /// Number of funded development accounts.
    pub accounts: usize,
    /// Index of the account that signs calls made without an explicit credential.
    pub default_signer: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let chain = ChainOptions::default();
        Self {
            solc: None,
            optimize: false,
            gas_limit: chain.gas_limit,
            initial_balance: chain.initial_balance,
            accounts: MAX_ACCOUNTS,
            default_signer: 0,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts == 0 {
            return Err(ConfigError::Invalid(
                "at least one account is required".to_string(),
            ));
        }
        if self.accounts > MAX_ACCOUNTS {
            return Err(AccountsError::TooMany {
                requested: self.accounts,
            }
            .into());
        }
        if self.default_signer >= self.accounts {
            return Err(ConfigError::Invalid(format!(
                "default_signer {} is out of range for {} accounts",
                self.default_signer, self.accounts
            )));
        }
        if self.gas_limit == 0 {
            return Err(ConfigError::Invalid("gas_limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            gas_limit: self.gas_limit,
            initial_balance: self.initial_balance,
        }
    }

    /// The compiler these settings select.
    pub fn solc(&self) -> Solc {
        let solc = match &self.solc {
            Some(path) => Solc::new(path.clone()),
            None => Solc::from_env(),
        };
        solc.with_optimizer(self.optimize)
    }
}

/// Parses an amount of wei, optionally followed by a `wei`, `gwei` or `ether` unit.
pub fn parse_wei(text: &str) -> Result<U256, String> {
    let text = text.trim();
    let (amount, unit) = match text.split_once(char::is_whitespace) {
        Some((amount, unit)) => (amount, unit.trim()),
        None => (text, "wei"),
    };
    let exponent = match unit {
        "wei" => 0u64,
        "gwei" => 9,
        "ether" => 18,
        other => return Err(format!("unknown unit `{other}`")),
    };

    let value = match amount.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(amount, 10),
    }
    .map_err(|err| format!("invalid amount `{amount}`: {err}"))?;

    value
        .checked_mul(U256::from(10u64).pow(U256::from(exponent)))
        .ok_or_else(|| format!("`{text}` does not fit in 256 bits"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Wei {
    Integer(u64),
    Text(String),
}

fn deserialize_wei<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    match Wei::deserialize(deserializer)? {
        Wei::Integer(value) => Ok(U256::from(value)),
        Wei::Text(text) => parse_wei(&text).map_err(serde::de::Error::custom),
    }
}
