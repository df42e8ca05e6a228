//! Deterministic development accounts.
//!
//! The keys are the first ten accounts of the widely used development mnemonic
//! `test test test test test test test test test test test junk`, so addresses
//! printed by the harness line up with other local-chain tooling.
use ethers_core::{k256::ecdsa::SigningKey, utils::secret_key_to_address};
use revm::primitives::Address;
use thiserror::Error;

const DEV_KEYS: [&str; 10] = [
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    "7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
    "47e179ec197488593b187f80a00eb0da91f1b9d0b13f8733639f19c30a34926a",
    "8b3a350cf5c34c9194ca85829a2df0ec3153be0318b5e2d3348e872092edffba",
    "92db14e403b83dfe3df233f83dfa3a0d7096f21ca9b0d6d6b8d88b2b4ec1564e",
    "4bbbf85ce3377467afe5d46f804f221813b2bb87f24d81f60f1fcdbf7cbf4356",
    "dbda1821b80551c9d65939329250298aa3472ba22feea921c0cf5d620ea67b97",
    "2a871d0798f97d79848a013d4936a73bf4cc922c825d33c1cf7073dff6d409c6",
];

/// Maximum number of accounts [`Accounts::deterministic`] can provide.
pub const MAX_ACCOUNTS: usize = DEV_KEYS.len();

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountsError {
    #[error("requested {requested} accounts, at most {MAX_ACCOUNTS} are available")]
    TooMany { requested: usize },
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// A signing key and the address derived from it.
#[derive(Debug, Clone)]
pub struct Credential {
    signing_key: SigningKey,
    address: Address,
}

impl Credential {
    pub fn from_private_key(hex_key: &str) -> Result<Self, AccountsError> {
        let bytes = abi::hex_to_bytes(hex_key)
            .map_err(|err| AccountsError::InvalidKey(err.to_string()))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|err| AccountsError::InvalidKey(err.to_string()))?;
        let address = Address::from_slice(secret_key_to_address(&signing_key).as_bytes());
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The address in the representation used by ABI values.
    pub fn abi_address(&self) -> ethers_core::types::Address {
        crate::to_abi_address(self.address)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// The fixed set of credentials funded at genesis.
#[derive(Debug, Clone)]
pub struct Accounts {
    credentials: Vec<Credential>,
}

impl Accounts {
    pub fn deterministic(count: usize) -> Result<Self, AccountsError> {
        if count > MAX_ACCOUNTS {
            return Err(AccountsError::TooMany { requested: count });
        }
        let credentials = DEV_KEYS[..count]
            .iter()
            .map(|key| Credential::from_private_key(key))
            .collect::<Result<_, _>>()?;
        Ok(Self { credentials })
    }

    pub fn credential(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.credentials.iter().map(Credential::address)
    }
}
