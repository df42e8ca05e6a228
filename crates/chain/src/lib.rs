//! An ephemeral in-memory EVM chain for contract tests, executed with `revm`.
//!
//! [`LocalChain`] keeps a snapshot of its genesis database so that [`LocalChain::reset`]
//! can restore the initial state without rebuilding accounts. Every transaction runs
//! to completion before the next one starts; logs are returned in emission order.
pub mod accounts;

pub use accounts::{Accounts, AccountsError, Credential};
pub use revm::{
    context::result::HaltReason,
    primitives::{Address, Log, U256},
};

use revm::{
    bytecode::Bytecode,
    context::{
        result::{ExecutionResult, Output},
        Context, TxEnv,
    },
    database::InMemoryDB,
    handler::{ExecuteCommitEvm, ExecuteEvm, MainBuilder, MainContext, MainnetContext, MainnetEvm},
    primitives::{Bytes as EvmBytes, TxKind},
    state::AccountInfo,
};
use std::{
    collections::{HashMap, HashSet},
    fmt,
};
use thiserror::Error;

/// Errors returned by the chain simulator.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no contract is deployed at {0}")]
    UnknownContract(Address),
    #[error("constructor reverted with data {0}")]
    DeploymentReverted(RevertData),
    #[error("execution reverted with data {0}")]
    Reverted(RevertData),
    #[error("execution halted: {reason:?} (gas_used={gas_used})")]
    Halted { reason: HaltReason, gas_used: u64 },
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("unexpected output variant from execution")]
    UnexpectedOutput,
}

/// Captures raw revert data and provides a nicer `Display` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertData(pub Vec<u8>);

impl RevertData {
    /// Message carried by `Error(string)` or `Panic(uint256)` revert data.
    pub fn reason(&self) -> Option<String> {
        abi::decode_revert_reason(&self.0)
    }
}

impl fmt::Display for RevertData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))?;
        if let Some(reason) = self.reason() {
            write!(f, " ({reason:?})")?;
        }
        Ok(())
    }
}

/// Parameters of the simulated chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOptions {
    /// Gas limit attached to every transaction.
    pub gas_limit: u64,
    /// Balance of every development account at genesis, in wei.
    pub initial_balance: U256,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            gas_limit: 10_000_000,
            // 100 ether
            initial_balance: U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)),
        }
    }
}

/// Outcome of a committed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub return_data: Vec<u8>,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Outcome of a contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Single-threaded in-memory chain.
pub struct LocalChain {
    evm: MainnetEvm<MainnetContext<InMemoryDB>>,
    genesis: InMemoryDB,
    options: ChainOptions,
    next_nonce_by_caller: HashMap<Address, u64>,
    live_contracts: HashSet<Address>,
    generation: u64,
}

impl LocalChain {
    /// Starts a chain where each of `accounts` holds `options.initial_balance`.
    pub fn new(options: ChainOptions, accounts: &Accounts) -> Self {
        let mut genesis = InMemoryDB::default();
        for address in accounts.addresses() {
            genesis.insert_account_info(
                address,
                AccountInfo::new(
                    options.initial_balance,
                    0,
                    Default::default(),
                    Bytecode::default(),
                ),
            );
        }
        tracing::info!(
            target: "chain",
            "starting local chain with {} funded accounts",
            accounts.len()
        );

        Self {
            evm: build_evm(genesis.clone()),
            genesis,
            options,
            next_nonce_by_caller: HashMap::new(),
            live_contracts: HashSet::new(),
            generation: 0,
        }
    }

    pub fn options(&self) -> ChainOptions {
        self.options
    }

    /// Incremented by every [`LocalChain::reset`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `address` holds a contract deployed since the last reset.
    pub fn is_live(&self, address: Address) -> bool {
        self.live_contracts.contains(&address)
    }

    /// Committed balance of `address`.
    pub fn balance(&self, address: Address) -> U256 {
        self.evm
            .ctx
            .journaled_state
            .database
            .cache
            .accounts
            .get(&address)
            .map(|account| account.info.balance)
            .unwrap_or_default()
    }

    /// Runs `init_code` (constructor bytecode with encoded arguments appended) in a
    /// creation transaction sent by `from`.
    pub fn deploy(&mut self, from: Address, init_code: Vec<u8>) -> Result<Deployment, ChainError> {
        let nonce = self.nonce_of(from);
        let tx = TxEnv::builder()
            .caller(from)
            .gas_limit(self.options.gas_limit)
            .gas_price(0)
            .kind(TxKind::Create)
            .data(EvmBytes::from(init_code))
            .nonce(nonce)
            .build()
            .map_err(|err| ChainError::Execution(format!("{err:?}")))?;

        let result = self
            .evm
            .transact_commit(tx)
            .map_err(|err| ChainError::Execution(err.to_string()))?;
        self.bump_nonce(from);

        match result {
            ExecutionResult::Success {
                output: Output::Create(_, Some(address)),
                gas_used,
                logs,
                ..
            } => {
                tracing::info!(
                    target: "chain",
                    "deployed contract at {address} (from={from}, gas_used={gas_used})"
                );
                self.live_contracts.insert(address);
                Ok(Deployment {
                    address,
                    gas_used,
                    logs,
                })
            }
            ExecutionResult::Success { output, .. } => Err(ChainError::Execution(format!(
                "deployment returned unexpected output: {output:?}"
            ))),
            ExecutionResult::Revert { output, .. } => {
                Err(ChainError::DeploymentReverted(RevertData(output.to_vec())))
            }
            ExecutionResult::Halt { reason, gas_used } => {
                Err(ChainError::Halted { reason, gas_used })
            }
        }
    }

    /// Sends a state-changing call from `from` to the contract at `to`.
    pub fn call(
        &mut self,
        from: Address,
        to: Address,
        calldata: &[u8],
        value: U256,
    ) -> Result<Receipt, ChainError> {
        self.ensure_live(to)?;
        let nonce = self.nonce_of(from);
        let tx = self.call_tx(from, to, calldata, value, nonce)?;

        let result = self
            .evm
            .transact_commit(tx)
            .map_err(|err| ChainError::Execution(err.to_string()))?;
        self.bump_nonce(from);
        let receipt = receipt_from(result)?;
        tracing::debug!(
            target: "chain",
            "call {from} -> {to}: gas_used={}, logs={}",
            receipt.gas_used,
            receipt.logs.len()
        );
        Ok(receipt)
    }

    /// Executes a call against the current state and discards every change it makes.
    /// The caller's nonce is left untouched.
    pub fn call_static(
        &mut self,
        from: Address,
        to: Address,
        calldata: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        self.ensure_live(to)?;
        let tx = self.call_tx(from, to, calldata, U256::ZERO, self.nonce_of(from))?;

        let outcome = self
            .evm
            .transact(tx)
            .map_err(|err| ChainError::Execution(err.to_string()))?;
        let receipt = receipt_from(outcome.result)?;
        tracing::debug!(
            target: "chain",
            "static call {from} -> {to}: gas_used={}",
            receipt.gas_used
        );
        Ok(receipt.return_data)
    }

    /// Restores genesis state. Contracts deployed so far are forgotten and the
    /// generation counter advances.
    pub fn reset(&mut self) {
        self.evm = build_evm(self.genesis.clone());
        self.next_nonce_by_caller.clear();
        self.live_contracts.clear();
        self.generation += 1;
        tracing::info!(target: "chain", "chain reset to genesis (generation {})", self.generation);
    }

    fn ensure_live(&self, address: Address) -> Result<(), ChainError> {
        if self.is_live(address) {
            Ok(())
        } else {
            Err(ChainError::UnknownContract(address))
        }
    }

    fn nonce_of(&self, caller: Address) -> u64 {
        self.next_nonce_by_caller.get(&caller).copied().unwrap_or(0)
    }

    /// Committed transactions consume a nonce even when they revert.
    fn bump_nonce(&mut self, caller: Address) {
        *self.next_nonce_by_caller.entry(caller).or_insert(0) += 1;
    }

    fn call_tx(
        &self,
        from: Address,
        to: Address,
        calldata: &[u8],
        value: U256,
        nonce: u64,
    ) -> Result<TxEnv, ChainError> {
        TxEnv::builder()
            .caller(from)
            .gas_limit(self.options.gas_limit)
            .gas_price(0)
            .to(to)
            .value(value)
            .data(EvmBytes::copy_from_slice(calldata))
            .nonce(nonce)
            .build()
            .map_err(|err| ChainError::Execution(format!("{err:?}")))
    }
}

fn build_evm(db: InMemoryDB) -> MainnetEvm<MainnetContext<InMemoryDB>> {
    Context::mainnet().with_db(db).build_mainnet()
}

fn receipt_from(result: ExecutionResult) -> Result<Receipt, ChainError> {
    match result {
        ExecutionResult::Success {
            output: Output::Call(bytes),
            gas_used,
            logs,
            ..
        } => Ok(Receipt {
            return_data: bytes.to_vec(),
            gas_used,
            logs,
        }),
        ExecutionResult::Success {
            output: Output::Create(..),
            ..
        } => Err(ChainError::UnexpectedOutput),
        ExecutionResult::Revert { output, .. } => {
            Err(ChainError::Reverted(RevertData(output.to_vec())))
        }
        ExecutionResult::Halt { reason, gas_used } => Err(ChainError::Halted { reason, gas_used }),
    }
}

/// Converts a chain address into the representation used by ABI values.
pub fn to_abi_address(address: Address) -> ethers_core::types::Address {
    ethers_core::types::Address::from_slice(address.as_slice())
}

/// Converts an ABI address into the chain representation.
pub fn from_abi_address(address: ethers_core::types::Address) -> Address {
    Address::from_slice(address.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Init code that copies `runtime` into memory and returns it.
    fn init_code_for(runtime: &[u8]) -> Vec<u8> {
        assert!(runtime.len() < 256);
        let len = runtime.len() as u8;
        // PUSH1 len, PUSH1 12, PUSH1 0, CODECOPY, PUSH1 len, PUSH1 0, RETURN
        let mut code = vec![
            0x60, len, 0x60, 0x0c, 0x60, 0x00, 0x39, 0x60, len, 0x60, 0x00, 0xf3,
        ];
        code.extend_from_slice(runtime);
        code
    }

    /// Runtime that increments storage slot 0 and returns the new value.
    fn counter_runtime() -> Vec<u8> {
        vec![
            0x60, 0x00, 0x54, // SLOAD(0)
            0x60, 0x01, 0x01, // ADD 1
            0x80, 0x60, 0x00, 0x55, // DUP1, SSTORE(0)
            0x60, 0x00, 0x52, // MSTORE(0)
            0x60, 0x20, 0x60, 0x00, 0xf3, // RETURN(0, 32)
        ]
    }

    fn word(bytes: &[u8]) -> U256 {
        U256::from_be_slice(bytes)
    }

    fn chain() -> (LocalChain, Accounts) {
        let accounts = Accounts::deterministic(3).unwrap();
        (LocalChain::new(ChainOptions::default(), &accounts), accounts)
    }

    #[test]
    fn genesis_funds_every_account() {
        let (chain, accounts) = chain();
        for address in accounts.addresses() {
            assert_eq!(chain.balance(address), ChainOptions::default().initial_balance);
        }
        assert_eq!(chain.balance(Address::with_last_byte(0x42)), U256::ZERO);
    }

    #[test]
    fn committed_calls_persist_state() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(0).unwrap().address();
        let deployment = chain
            .deploy(from, init_code_for(&counter_runtime()))
            .expect("deployment succeeds");
        assert!(chain.is_live(deployment.address));

        let first = chain
            .call(from, deployment.address, &[], U256::ZERO)
            .expect("first call succeeds");
        assert_eq!(word(&first.return_data), U256::from(1));
        let second = chain
            .call(from, deployment.address, &[], U256::ZERO)
            .expect("second call succeeds");
        assert_eq!(word(&second.return_data), U256::from(2));
    }

    #[test]
    fn static_calls_do_not_mutate_state() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(0).unwrap().address();
        let address = chain
            .deploy(from, init_code_for(&counter_runtime()))
            .unwrap()
            .address;

        for _ in 0..2 {
            let output = chain.call_static(from, address, &[]).unwrap();
            assert_eq!(word(&output), U256::from(1));
        }
        let committed = chain.call(from, address, &[], U256::ZERO).unwrap();
        assert_eq!(word(&committed.return_data), U256::from(1));
    }

    #[test]
    fn reset_forgets_contracts_and_restores_balances() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(1).unwrap().address();
        let address = chain
            .deploy(from, init_code_for(&counter_runtime()))
            .unwrap()
            .address;
        chain.call(from, address, &[], U256::from(1_000u64)).unwrap();
        assert_eq!(chain.balance(address), U256::from(1_000u64));

        chain.reset();
        assert_eq!(chain.generation(), 1);
        assert!(!chain.is_live(address));
        assert!(matches!(
            chain.call(from, address, &[], U256::ZERO),
            Err(ChainError::UnknownContract(a)) if a == address
        ));
        assert_eq!(chain.balance(address), U256::ZERO);
        assert_eq!(chain.balance(from), ChainOptions::default().initial_balance);

        // nonces restart, so the first deployment lands on the same address again
        let redeployed = chain
            .deploy(from, init_code_for(&counter_runtime()))
            .unwrap()
            .address;
        assert_eq!(redeployed, address);
    }

    #[test]
    fn reverting_constructor_is_reported() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(0).unwrap().address();
        // PUSH1 0, PUSH1 0, REVERT
        let err = chain.deploy(from, vec![0x60, 0x00, 0x60, 0x00, 0xfd]).unwrap_err();
        assert!(matches!(err, ChainError::DeploymentReverted(RevertData(data)) if data.is_empty()));
    }

    #[test]
    fn reverting_call_keeps_revert_data() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(0).unwrap().address();
        // MSTORE(0, 0xdead), REVERT(30, 2)
        let runtime = [
            0x61, 0xde, 0xad, 0x60, 0x00, 0x52, 0x60, 0x02, 0x60, 0x1e, 0xfd,
        ];
        let address = chain.deploy(from, init_code_for(&runtime)).unwrap().address;
        let err = chain.call(from, address, &[], U256::ZERO).unwrap_err();
        match err {
            ChainError::Reverted(data) => {
                assert_eq!(data.0, vec![0xde, 0xad]);
                assert_eq!(data.to_string(), "0xdead");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn logs_are_returned_in_emission_order() {
        let (mut chain, accounts) = chain();
        let from = accounts.credential(0).unwrap().address();
        // LOG1(0, 0, topic=1), LOG1(0, 0, topic=2), STOP
        let runtime = [
            0x60, 0x01, 0x60, 0x00, 0x60, 0x00, 0xa1, 0x60, 0x02, 0x60, 0x00, 0x60, 0x00, 0xa1,
            0x00,
        ];
        let address = chain.deploy(from, init_code_for(&runtime)).unwrap().address;
        let receipt = chain.call(from, address, &[], U256::ZERO).unwrap();
        let topics = receipt
            .logs
            .iter()
            .map(|log| word(log.data.topics()[0].as_slice()))
            .collect::<Vec<_>>();
        assert_eq!(topics, vec![U256::from(1), U256::from(2)]);
        assert!(receipt.logs.iter().all(|log| log.address == address));
    }

    #[test]
    fn revert_data_display_includes_reason() {
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend(ethers_core::abi::encode(&[ethers_core::abi::Token::String(
            "nope".into(),
        )]));
        let rendered = RevertData(data).to_string();
        assert!(rendered.starts_with("0x08c379a0"));
        assert!(rendered.ends_with("(\"nope\")"));
    }

    #[test]
    fn address_conversions_round_trip() {
        let address = Address::with_last_byte(0xab);
        assert_eq!(from_abi_address(to_abi_address(address)), address);
    }
}
