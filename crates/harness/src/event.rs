use abi::{Abi, Token};
use chain::{Address, Log};
use ethers_core::{abi::RawLog, types::H256};

use crate::HarnessError;

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    address: Address,
    params: Vec<(String, Token)>,
}

impl Event {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contract that emitted the event.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Every parameter in declaration order, indexed ones included.
    pub fn values(&self) -> Vec<&Token> {
        self.params.iter().map(|(_, value)| value).collect()
    }

    pub fn value(&self, index: usize) -> Option<&Token> {
        self.params.get(index).map(|(_, value)| value)
    }

    pub fn param(&self, name: &str) -> Option<&Token> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Decodes `logs` in order. `abi_for` supplies the ABI of each emitting address;
/// a log that cannot be decoded fails the whole batch.
pub(crate) fn decode_logs<'a>(
    logs: &[Log],
    abi_for: impl Fn(Address) -> Option<&'a Abi>,
) -> Result<Vec<Event>, HarnessError> {
    logs.iter()
        .map(|log| {
            let abi = abi_for(log.address).ok_or_else(|| {
                HarnessError::Decoding(format!(
                    "log emitted by {} which is neither the called contract nor a referenced one",
                    log.address
                ))
            })?;
            decode_log(abi, log)
        })
        .collect()
}

fn decode_log(abi: &Abi, log: &Log) -> Result<Event, HarnessError> {
    let topics = log
        .data
        .topics()
        .iter()
        .map(|topic| H256::from_slice(topic.as_slice()))
        .collect::<Vec<_>>();
    let topic0 = topics.first().copied().ok_or_else(|| {
        HarnessError::Decoding(format!("anonymous log emitted by {}", log.address))
    })?;

    let event = abi
        .events()
        .find(|event| !event.anonymous && event.signature() == topic0)
        .ok_or_else(|| {
            HarnessError::Decoding(format!(
                "no event with topic {topic0:?} in the ABI of {}",
                log.address
            ))
        })?;

    let parsed = event
        .parse_log(RawLog {
            topics,
            data: log.data.data.to_vec(),
        })
        .map_err(|err| HarnessError::Decoding(format!("event {}: {err}", event.name)))?;

    Ok(Event {
        name: event.name.clone(),
        address: log.address,
        params: parsed
            .params
            .into_iter()
            .map(|param| (param.name, param.value))
            .collect(),
    })
}
