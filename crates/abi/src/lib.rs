//! Contract ABI helpers used by the solbench harness.
//!
//! Values are modelled with [`Token`], the closed sum type of `ethers_core`'s ABI
//! module. This crate adds the pieces a test harness needs on top of it:
//! selectors from canonical signatures, parameter encoding with reserved leading
//! slots, coercion of loosely typed arguments to declared ABI types, and revert
//! reason decoding.
mod codec;
mod function;

pub use codec::{
    canonical_signature, coerce, create_array, decode, decode_revert_reason, encode_call,
    encode_parameters, function_hash, hex_to_bytes, param_type_of, parse_param_type, selector,
};
pub use ethers_core::abi::{Abi, Event as AbiEvent, Function, ParamType, Token, Tokenize};
pub use function::FunctionSpec;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("decoding error: {0}")]
    Decoding(String),
    #[error("invalid abi type `{0}`")]
    InvalidType(String),
    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),
}
