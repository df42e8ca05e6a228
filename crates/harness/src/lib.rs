//! Test harness for EVM contracts.
//!
//! A [`TestChain`] owns an in-memory chain with funded development accounts. Tests
//! deploy [`ContractDefinition`]s compiled by a [`ContractRegistry`], call them by
//! method name and assert on the decoded [`Event`]s each call emitted.
//!
//! ```no_run
//! use solbench_harness::{ContractRegistry, TestChain, Token};
//!
//! # fn main() -> Result<(), solbench_harness::HarnessError> {
//! let mut registry = ContractRegistry::default();
//! registry.compile_file("tests/fixtures/DOS.sol")?;
//! let token = registry.get("DOS").expect("compiled");
//!
//! let mut chain = TestChain::run_local()?;
//! let owner = chain.credential(0).expect("funded account").clone();
//! let dos = chain.deploy(&owner, &token)?;
//! let events = chain.call(&dos, "finishMinting", ())?;
//! assert!(events.is_empty());
//! # Ok(())
//! # }
//! ```
mod config;
mod contract;
mod event;

pub use abi::{create_array, encode_parameters, function_hash, FunctionSpec, Token, Tokenize};
pub use chain::{
    from_abi_address, to_abi_address, Accounts, Address, Credential, HaltReason, RevertData, U256,
};
pub use config::{parse_wei, ConfigError, HarnessConfig};
pub use contract::DeployedContract;
pub use event::Event;
pub use solc_runner::{CompileError, ContractDefinition, ContractRegistry, Solc};

use std::{fmt, sync::Arc};

use abi::{AbiError, Function, ParamType};
use chain::{ChainError, LocalChain};
use thiserror::Error;

/// Error type returned by the harness.
#[derive(Error)]
pub enum HarnessError {
    #[error("compilation failed: {0}")]
    Compilation(#[from] CompileError),
    #[error("failed to deploy `{contract}`: {source}")]
    Deployment {
        contract: String,
        #[source]
        source: ChainError,
    },
    #[error("call reverted with data {0}")]
    CallReverted(RevertData),
    #[error("`{contract}` has no method `{method}` taking {arity} argument(s)")]
    NoSuchMethod {
        contract: String,
        method: String,
        arity: usize,
    },
    #[error("abi encoding failed: {0}")]
    Encoding(String),
    #[error("abi decoding failed: {0}")]
    Decoding(String),
    #[error("no contract is deployed at {0}")]
    UnknownContract(Address),
    #[error("contract at {0} was deployed before the chain was reset")]
    StaleContract(Address),
    #[error("execution halted: {reason:?} (gas_used={gas_used})")]
    Halted { reason: HaltReason, gas_used: u64 },
    #[error("execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl fmt::Debug for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<AbiError> for HarnessError {
    fn from(err: AbiError) -> Self {
        match err {
            AbiError::Decoding(msg) => HarnessError::Decoding(msg),
            other => HarnessError::Encoding(other.to_string()),
        }
    }
}

impl From<ChainError> for HarnessError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::UnknownContract(address) => HarnessError::UnknownContract(address),
            ChainError::Reverted(data) | ChainError::DeploymentReverted(data) => {
                HarnessError::CallReverted(data)
            }
            ChainError::Halted { reason, gas_used } => HarnessError::Halted { reason, gas_used },
            other => HarnessError::Execution(other.to_string()),
        }
    }
}

impl HarnessError {
    /// Revert message when the failure is a revert carrying `Error(string)` or
    /// `Panic(uint256)` data.
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            HarnessError::CallReverted(data) => data.reason(),
            HarnessError::Deployment {
                source: ChainError::DeploymentReverted(data),
                ..
            } => data.reason(),
            _ => None,
        }
    }
}

/// An isolated local chain plus the credentials funded on it.
///
/// All operations run to completion before returning. A `TestChain` is not shared
/// between concurrently running tests; each test builds its own or resets a shared
/// one between cases.
pub struct TestChain {
    chain: LocalChain,
    accounts: Accounts,
    default_signer: Credential,
}

impl TestChain {
    /// Starts a chain with the default [`HarnessConfig`].
    pub fn run_local() -> Result<Self, HarnessError> {
        Self::with_config(&HarnessConfig::default())
    }

    pub fn with_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let accounts = Accounts::deterministic(config.accounts).map_err(ConfigError::from)?;
        let default_signer = accounts
            .credential(config.default_signer)
            .cloned()
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "default_signer {} is out of range",
                    config.default_signer
                ))
            })?;
        let chain = LocalChain::new(config.chain_options(), &accounts);
        Ok(Self {
            chain,
            accounts,
            default_signer,
        })
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn credential(&self, index: usize) -> Option<&Credential> {
        self.accounts.credential(index)
    }

    /// Signer of [`TestChain::call`].
    pub fn default_signer(&self) -> &Credential {
        &self.default_signer
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.chain.balance(address)
    }

    pub fn deploy(
        &mut self,
        from: &Credential,
        definition: &Arc<ContractDefinition>,
    ) -> Result<DeployedContract, HarnessError> {
        self.deploy_with_args(from, definition, ())
    }

    /// Deploys `definition` with ABI-encoded constructor arguments.
    pub fn deploy_with_args(
        &mut self,
        from: &Credential,
        definition: &Arc<ContractDefinition>,
        args: impl Tokenize,
    ) -> Result<DeployedContract, HarnessError> {
        let name = definition.name().to_string();
        if !definition.is_deployable() {
            return Err(HarnessError::Deployment {
                contract: name,
                source: ChainError::Execution("contract has no init bytecode".to_string()),
            });
        }

        let args = args.into_tokens();
        let init_code = match definition.abi().constructor() {
            Some(constructor) => {
                let params = constructor
                    .inputs
                    .iter()
                    .map(|param| &param.kind)
                    .collect::<Vec<_>>();
                if params.len() != args.len() {
                    return Err(HarnessError::Encoding(format!(
                        "constructor of `{name}` takes {} argument(s), got {}",
                        params.len(),
                        args.len()
                    )));
                }
                let tokens = coerce_all(args, params)?;
                constructor
                    .encode_input(definition.bytecode().to_vec(), &tokens)
                    .map_err(|err| HarnessError::Encoding(err.to_string()))?
            }
            None if args.is_empty() => definition.bytecode().to_vec(),
            None => {
                return Err(HarnessError::Encoding(format!(
                    "`{name}` has no constructor but {} argument(s) were given",
                    args.len()
                )))
            }
        };

        let deployment = self
            .chain
            .deploy(from.address(), init_code)
            .map_err(|source| HarnessError::Deployment {
                contract: name.clone(),
                source,
            })?;
        tracing::info!(
            target: "harness",
            "deployed {name} at {} (gas_used={})",
            deployment.address,
            deployment.gas_used
        );
        Ok(DeployedContract::new(
            definition.clone(),
            deployment.address,
            self.chain.generation(),
        ))
    }

    /// Calls `method` on `contract` as the default signer and returns the decoded
    /// events in emission order.
    pub fn call(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: impl Tokenize,
    ) -> Result<Vec<Event>, HarnessError> {
        let from = self.default_signer.address();
        self.send(from, contract, method, args.into_tokens())
    }

    pub fn call_as(
        &mut self,
        from: &Credential,
        contract: &DeployedContract,
        method: &str,
        args: impl Tokenize,
    ) -> Result<Vec<Event>, HarnessError> {
        self.send(from.address(), contract, method, args.into_tokens())
    }

    /// Runs a read-only call. State is left unchanged.
    ///
    /// When the contract ABI declares `spec`'s method, the call is resolved against
    /// it like [`TestChain::call`]; otherwise it is encoded from the signature
    /// inferred from `spec`'s inputs. Return data is decoded with the output types
    /// `spec` declares, or with the ABI's outputs when it declares none.
    pub fn call_constant(
        &mut self,
        contract: &DeployedContract,
        spec: &FunctionSpec,
    ) -> Result<Vec<Token>, HarnessError> {
        self.ensure_current(contract)?;
        let in_abi = contract
            .contract()
            .abi()
            .functions_by_name(spec.name())
            .is_ok();
        let (calldata, abi_outputs) = if in_abi {
            let (function, tokens) =
                resolve_function(contract, spec.name(), spec.inputs().to_vec())?;
            let calldata = function
                .encode_input(&tokens)
                .map_err(|err| HarnessError::Encoding(err.to_string()))?;
            let outputs = function
                .outputs
                .iter()
                .map(|param| param.kind.clone())
                .collect::<Vec<_>>();
            (calldata, outputs)
        } else {
            tracing::debug!(
                target: "harness",
                "{} is not in the abi of {}; calling {}",
                spec.name(),
                contract.contract().name(),
                spec.signature()?
            );
            (spec.encode_input()?, vec![])
        };

        let from = self.default_signer.address();
        let output = self
            .chain
            .call_static(from, contract.contract_address(), &calldata)?;
        tracing::debug!(
            target: "harness",
            "constant call {}.{}: {} byte(s) returned",
            contract.contract().name(),
            spec.name(),
            output.len()
        );
        if spec.has_outputs() {
            Ok(spec.decode_output(&output)?)
        } else {
            Ok(abi::decode(&abi_outputs, &output)?)
        }
    }

    /// Returns the chain to genesis. Handles deployed so far become stale.
    pub fn reset(&mut self) {
        self.chain.reset();
        tracing::info!(target: "harness", "reset test chain");
    }

    /// Tears the chain down. Consuming `self` rules out further calls.
    pub fn shutdown(self) {
        tracing::info!(
            target: "harness",
            "shutting down test chain after {} reset(s)",
            self.chain.generation()
        );
    }

    fn send(
        &mut self,
        from: Address,
        contract: &DeployedContract,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Event>, HarnessError> {
        self.ensure_current(contract)?;
        let (function, tokens) = resolve_function(contract, method, args)?;
        let calldata = function
            .encode_input(&tokens)
            .map_err(|err| HarnessError::Encoding(err.to_string()))?;

        let receipt = self
            .chain
            .call(from, contract.contract_address(), &calldata, U256::ZERO)?;
        let events = event::decode_logs(&receipt.logs, |emitter| contract.abi_for(emitter))?;
        tracing::debug!(
            target: "harness",
            "{from} called {}.{method} (gas_used={}, events={})",
            contract.contract().name(),
            receipt.gas_used,
            events.len()
        );
        Ok(events)
    }

    fn ensure_current(&self, contract: &DeployedContract) -> Result<(), HarnessError> {
        let address = contract.contract_address();
        if contract.generation() != self.chain.generation() {
            return Err(HarnessError::StaleContract(address));
        }
        if !self.chain.is_live(address) {
            return Err(HarnessError::UnknownContract(address));
        }
        Ok(())
    }
}

/// Picks the overload of `method` whose arity matches `args` and whose parameter
/// types the arguments can be coerced to.
fn resolve_function<'a>(
    contract: &'a DeployedContract,
    method: &str,
    args: Vec<Token>,
) -> Result<(&'a Function, Vec<Token>), HarnessError> {
    let definition = contract.contract();
    let no_such_method = || HarnessError::NoSuchMethod {
        contract: definition.name().to_string(),
        method: method.to_string(),
        arity: args.len(),
    };
    let overloads = definition
        .abi()
        .functions_by_name(method)
        .map_err(|_| no_such_method())?;

    let mut mismatch = None;
    for function in overloads
        .iter()
        .filter(|function| function.inputs.len() == args.len())
    {
        let params = function.inputs.iter().map(|param| &param.kind).collect();
        match coerce_all(args.clone(), params) {
            Ok(tokens) => return Ok((function, tokens)),
            Err(err) => mismatch = Some(err),
        }
    }
    Err(mismatch.unwrap_or_else(no_such_method))
}

fn coerce_all(
    args: Vec<Token>,
    params: Vec<&ParamType>,
) -> Result<Vec<Token>, HarnessError> {
    args.into_iter()
        .zip(params)
        .map(|(token, param)| abi::coerce(token, param).map_err(HarnessError::from))
        .collect()
}
