use std::{
    collections::{BTreeMap, HashMap},
    fs,
    sync::Arc,
};

use camino::{Utf8Path, Utf8PathBuf};
use ethers_core::utils::keccak256;

use crate::{parse_combined_json, CompileError, ContractDefinition, Solc};

struct CompiledSource {
    content_hash: [u8; 32],
    contracts: BTreeMap<String, Arc<ContractDefinition>>,
}

/// Contract definitions by name, populated from compiled sources or precompiled
/// artifacts. Later definitions replace earlier ones with the same name.
pub struct ContractRegistry {
    solc: Solc,
    contracts: BTreeMap<String, Arc<ContractDefinition>>,
    sources: HashMap<Utf8PathBuf, CompiledSource>,
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new(Solc::from_env())
    }
}

impl ContractRegistry {
    pub fn new(solc: Solc) -> Self {
        Self {
            solc,
            contracts: BTreeMap::new(),
            sources: HashMap::new(),
        }
    }

    pub fn solc(&self) -> &Solc {
        &self.solc
    }

    /// Compiles `path` and registers its contracts.
    ///
    /// The compiler runs at most once per source content: compiling an unchanged file
    /// again returns the definitions from the first run and makes them current again
    /// under their names.
    pub fn compile_file(
        &mut self,
        path: impl AsRef<Utf8Path>,
    ) -> Result<BTreeMap<String, Arc<ContractDefinition>>, CompileError> {
        let path = path.as_ref();
        let content_hash = keccak256(fs::read(path)?);

        if let Some(cached) = self
            .sources
            .get(path)
            .filter(|cached| cached.content_hash == content_hash)
        {
            tracing::debug!(target: "solc", "{path} unchanged; reusing compiled contracts");
            let contracts = cached.contracts.clone();
            self.register(&contracts);
            return Ok(contracts);
        }

        let contracts = self
            .solc
            .compile(path)?
            .into_iter()
            .map(|(name, definition)| (name, Arc::new(definition)))
            .collect::<BTreeMap<_, _>>();
        self.register(&contracts);
        self.sources.insert(
            path.to_owned(),
            CompiledSource {
                content_hash,
                contracts: contracts.clone(),
            },
        );
        Ok(contracts)
    }

    /// Registers artifacts produced earlier by `solc --combined-json abi,bin,bin-runtime`.
    /// Returns the names of the contracts added.
    pub fn load_combined_json(&mut self, json: &str) -> Result<Vec<String>, CompileError> {
        let contracts = parse_combined_json(json)?
            .into_iter()
            .map(|(name, definition)| (name, Arc::new(definition)))
            .collect::<BTreeMap<_, _>>();
        self.register(&contracts);
        Ok(contracts.into_keys().collect())
    }

    /// Registers a single definition under its own name.
    pub fn insert(&mut self, definition: ContractDefinition) -> Arc<ContractDefinition> {
        let definition = Arc::new(definition);
        self.contracts
            .insert(definition.name().to_string(), definition.clone());
        definition
    }

    pub fn get(&self, name: &str) -> Option<Arc<ContractDefinition>> {
        self.contracts.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    fn register(&mut self, contracts: &BTreeMap<String, Arc<ContractDefinition>>) {
        for (name, definition) in contracts {
            self.contracts.insert(name.clone(), definition.clone());
        }
    }
}
