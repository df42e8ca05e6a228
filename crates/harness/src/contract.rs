use std::sync::Arc;

use abi::Abi;
use chain::Address;
use solc_runner::ContractDefinition;

/// A contract instance deployed by a [`TestChain`](crate::TestChain).
///
/// Handles are only valid for the chain generation they were deployed in; after
/// [`TestChain::reset`](crate::TestChain::reset) every call through an older handle
/// fails with [`HarnessError::StaleContract`](crate::HarnessError::StaleContract).
#[derive(Debug, Clone)]
pub struct DeployedContract {
    definition: Arc<ContractDefinition>,
    address: Address,
    generation: u64,
    referenced: Vec<(Address, Arc<ContractDefinition>)>,
}

impl DeployedContract {
    pub(crate) fn new(definition: Arc<ContractDefinition>, address: Address, generation: u64) -> Self {
        Self {
            definition,
            address,
            generation,
            referenced: Vec::new(),
        }
    }

    pub fn contract_address(&self) -> Address {
        self.address
    }

    pub fn contract(&self) -> &Arc<ContractDefinition> {
        &self.definition
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Records that this contract calls into `other`.
    ///
    /// Nothing is sent to the chain. Events emitted by `other` while serving a call
    /// to this contract are decoded with `other`'s ABI. A handle from another chain
    /// generation is ignored, since its address may now hold a different contract.
    pub fn add_referenced_contract(&mut self, other: &DeployedContract) {
        if other.generation != self.generation {
            tracing::warn!(
                target: "harness",
                "ignoring reference from {} to {}: deployed in generation {}, not {}",
                self.address,
                other.address,
                other.generation,
                self.generation
            );
            return;
        }
        if other.address == self.address
            || self.referenced.iter().any(|(address, _)| *address == other.address)
        {
            return;
        }
        self.referenced
            .push((other.address, other.definition.clone()));
    }

    pub fn referenced_contracts(&self) -> impl Iterator<Item = (Address, &ContractDefinition)> {
        self.referenced
            .iter()
            .map(|(address, definition)| (*address, definition.as_ref()))
    }

    /// ABI used to decode logs emitted by `emitter` during a call to this contract.
    pub(crate) fn abi_for(&self, emitter: Address) -> Option<&Abi> {
        if emitter == self.address {
            return Some(self.definition.abi());
        }
        self.referenced
            .iter()
            .find(|(address, _)| *address == emitter)
            .map(|(_, definition)| definition.abi())
    }
}
