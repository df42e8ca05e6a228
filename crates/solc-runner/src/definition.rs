use std::collections::BTreeMap;

use ethers_core::abi::Abi;
use serde::Deserialize;

use crate::CompileError;

/// A compiled contract: its ABI together with init and runtime bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDefinition {
    name: String,
    abi: Abi,
    bytecode: Vec<u8>,
    runtime_bytecode: Vec<u8>,
}

impl ContractDefinition {
    /// Builds a definition from hex-encoded bytecode (with or without `0x`).
    pub fn new(
        name: impl Into<String>,
        abi: Abi,
        bytecode_hex: &str,
        runtime_bytecode_hex: &str,
    ) -> Result<Self, CompileError> {
        let name = name.into();
        let bytecode = decode_bytecode(&name, bytecode_hex)?;
        let runtime_bytecode = decode_bytecode(&name, runtime_bytecode_hex)?;
        Ok(Self {
            name,
            abi,
            bytecode,
            runtime_bytecode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// Init code; constructor arguments are appended to it on deployment.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn runtime_bytecode(&self) -> &[u8] {
        &self.runtime_bytecode
    }

    /// Interfaces and abstract contracts compile to an ABI without init code.
    pub fn is_deployable(&self) -> bool {
        !self.bytecode.is_empty()
    }
}

fn decode_bytecode(contract: &str, code: &str) -> Result<Vec<u8>, CompileError> {
    let code = code.trim();
    let code = code.strip_prefix("0x").unwrap_or(code);
    if code.contains("__") {
        return Err(CompileError::InvalidBytecode {
            contract: contract.to_string(),
            reason: "unlinked library placeholder".to_string(),
        });
    }
    hex::decode(code).map_err(|err| CompileError::InvalidBytecode {
        contract: contract.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Deserialize)]
struct CombinedJson {
    contracts: BTreeMap<String, CombinedContract>,
}

#[derive(Deserialize)]
struct CombinedContract {
    abi: Option<serde_json::Value>,
    bin: Option<String>,
    #[serde(rename = "bin-runtime")]
    bin_runtime: Option<String>,
}

/// Parses the output of `solc --combined-json abi,bin,bin-runtime`.
///
/// Contracts are keyed by their bare name; the `path:` prefix solc adds is dropped.
/// Older compilers emit the ABI as a JSON string, newer ones as an array; both are
/// accepted.
pub fn parse_combined_json(
    json: &str,
) -> Result<BTreeMap<String, ContractDefinition>, CompileError> {
    let combined: CombinedJson = serde_json::from_str(json)?;
    let mut definitions = BTreeMap::new();

    for (key, contract) in combined.contracts {
        let name = key
            .rsplit_once(':')
            .map(|(_, name)| name)
            .unwrap_or(&key)
            .to_string();
        let missing = |field| CompileError::MissingBytecode {
            contract: name.clone(),
            field,
        };

        let abi = match contract.abi.ok_or_else(|| missing("abi"))? {
            serde_json::Value::String(text) => serde_json::from_str(&text)?,
            value => serde_json::from_value(value)?,
        };
        let bin = contract.bin.ok_or_else(|| missing("bin"))?;
        let bin_runtime = contract.bin_runtime.ok_or_else(|| missing("bin-runtime"))?;
        let definition = ContractDefinition::new(name.clone(), abi, &bin, &bin_runtime)?;

        if definitions.insert(name.clone(), definition).is_some() {
            tracing::warn!(
                target: "solc",
                "multiple contracts named `{name}` in compiler output; keeping `{key}`"
            );
        }
    }

    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUE_ABI: &str = r#"[{"type":"function","name":"value","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}]"#;

    #[test]
    fn parses_abi_given_as_array() {
        let json = format!(
            r#"{{"contracts":{{"src/Store.sol:Store":{{"abi":{VALUE_ABI},"bin":"6001","bin-runtime":"6002"}}}},"version":"0.8.24"}}"#
        );
        let definitions = parse_combined_json(&json).unwrap();
        let store = &definitions["Store"];
        assert_eq!(store.name(), "Store");
        assert_eq!(store.bytecode(), &[0x60, 0x01]);
        assert_eq!(store.runtime_bytecode(), &[0x60, 0x02]);
        assert!(store.abi().function("value").is_ok());
    }

    #[test]
    fn parses_abi_given_as_string() {
        let json = serde_json::json!({
            "contracts": {
                "Store.sol:Store": {
                    "abi": VALUE_ABI,
                    "bin": "",
                    "bin-runtime": "",
                }
            }
        })
        .to_string();
        let definitions = parse_combined_json(&json).unwrap();
        let store = &definitions["Store"];
        assert!(!store.is_deployable());
        assert_eq!(store.abi().functions().count(), 1);
    }

    #[test]
    fn missing_fields_are_reported() {
        let json = r#"{"contracts":{"A.sol:A":{"abi":[],"bin":"00"}}}"#;
        assert!(matches!(
            parse_combined_json(json),
            Err(CompileError::MissingBytecode { field: "bin-runtime", .. })
        ));
    }

    #[test]
    fn unlinked_libraries_are_rejected() {
        let err = ContractDefinition::new(
            "Uses",
            Abi::default(),
            "73__$0123456789abcdef0123456789abcdef01$__63",
            "",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unlinked library"));
    }

    #[test]
    fn accepts_prefixed_hex() {
        let definition = ContractDefinition::new("A", Abi::default(), "0x6000", "0x").unwrap();
        assert_eq!(definition.bytecode(), &[0x60, 0x00]);
        assert!(definition.runtime_bytecode().is_empty());
    }
}
