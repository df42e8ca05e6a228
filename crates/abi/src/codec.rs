use ethers_core::{
    abi::{self, AbiParser, ParamType, Token},
    types::{Address, U256},
    utils::keccak256,
};
use hex::FromHex;

use crate::AbiError;

/// Selector of `Error(string)`, the payload of `require`/`revert` with a message.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// Selector of `Panic(uint256)`, emitted by failed assertions and arithmetic checks.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
const WORD: usize = 32;

/// Returns the 4-byte selector of a canonical signature such as `transfer(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Hex-encoded selector (no `0x` prefix) of a canonical signature.
pub fn function_hash(signature: &str) -> String {
    hex::encode(selector(signature))
}

/// Builds `name(type1,type2,...)` from a function name and its parameter types.
pub fn canonical_signature(name: &str, params: &[ParamType]) -> String {
    let params = params
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({params})")
}

/// Parses a single ABI type such as `uint256`, `address[]` or `(bool,string)`.
pub fn parse_param_type(ty: &str) -> Result<ParamType, AbiError> {
    let ty = ty.trim();
    let function = AbiParser::default()
        .parse_function(&format!("param({ty})"))
        .map_err(|_| AbiError::InvalidType(ty.to_string()))?;
    match function.inputs.as_slice() {
        [param] => Ok(param.kind.clone()),
        _ => Err(AbiError::InvalidType(ty.to_string())),
    }
}

/// Infers the ABI type of a value.
///
/// Integers are widened to 256 bits. Arrays must be non-empty and homogeneous.
pub fn param_type_of(token: &Token) -> Result<ParamType, AbiError> {
    Ok(match token {
        Token::Address(_) => ParamType::Address,
        Token::FixedBytes(bytes) => ParamType::FixedBytes(bytes.len()),
        Token::Bytes(_) => ParamType::Bytes,
        Token::Int(_) => ParamType::Int(256),
        Token::Uint(_) => ParamType::Uint(256),
        Token::Bool(_) => ParamType::Bool,
        Token::String(_) => ParamType::String,
        Token::Array(items) => ParamType::Array(Box::new(element_type(items)?.ok_or_else(
            || AbiError::Encoding("cannot infer the element type of an empty array".into()),
        )?)),
        Token::FixedArray(items) => ParamType::FixedArray(
            Box::new(element_type(items)?.ok_or_else(|| {
                AbiError::Encoding("cannot infer the element type of an empty array".into())
            })?),
            items.len(),
        ),
        Token::Tuple(items) => ParamType::Tuple(
            items
                .iter()
                .map(param_type_of)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

/// Common element type of an array, `None` when the array is empty.
fn element_type(items: &[Token]) -> Result<Option<ParamType>, AbiError> {
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let expected = param_type_of(first)?;
    for (idx, item) in items.iter().enumerate().skip(1) {
        let found = param_type_of(item)?;
        if found != expected {
            return Err(AbiError::Encoding(format!(
                "array element {idx} has type `{found}`, expected `{expected}`"
            )));
        }
    }
    Ok(Some(expected))
}

/// Validates a value tree, allowing empty arrays anywhere.
fn check_token(token: &Token) -> Result<(), AbiError> {
    match token {
        Token::Array(items) | Token::FixedArray(items) => {
            element_type(items)?;
            items.iter().try_for_each(check_token)
        }
        Token::Tuple(items) => items.iter().try_for_each(check_token),
        _ => Ok(()),
    }
}

/// Wraps same-typed values into a dynamic array parameter.
pub fn create_array(elements: Vec<Token>) -> Result<Token, AbiError> {
    element_type(&elements)?;
    Ok(Token::Array(elements))
}

/// Encodes `values` as if they followed `skip` leading parameters, and returns
/// only the encoding of `values` as lower-case hex.
///
/// The skipped parameters are expected to be filled in by someone else, for example
/// a token contract that prepends `(address _from, uint256 _value)` before forwarding
/// the call. Offsets of dynamic values therefore stay relative to the start of the
/// complete argument block.
pub fn encode_parameters(skip: usize, values: &[Token]) -> Result<String, AbiError> {
    values.iter().try_for_each(check_token)?;

    let mut tokens = vec![Token::Uint(U256::zero()); skip];
    tokens.extend_from_slice(values);
    let encoded = abi::encode(&tokens);
    Ok(hex::encode(&encoded[skip * WORD..]))
}

/// Encodes a call to `signature` with the given arguments: selector followed by the
/// encoded argument tuple.
pub fn encode_call(signature: &str, args: &[Token]) -> Result<Vec<u8>, AbiError> {
    args.iter().try_for_each(check_token)?;
    let mut calldata = selector(signature).to_vec();
    calldata.extend(abi::encode(args));
    Ok(calldata)
}

/// Decodes `data` according to the declared `types`.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    if data.len() < types.len() * WORD {
        return Err(AbiError::Decoding(format!(
            "{} bytes are not enough for {} values",
            data.len(),
            types.len()
        )));
    }
    abi::decode(types, data).map_err(|err| AbiError::Decoding(err.to_string()))
}

/// Converts a loosely typed value into the declared `param` type.
///
/// Handles the conversions a caller cannot express with plain Rust values: byte
/// vectors passed for `bytesN`, hex strings passed for `address`, unsigned literals
/// passed for signed integers. The result always type-checks against `param`.
pub fn coerce(token: Token, param: &ParamType) -> Result<Token, AbiError> {
    let coerced = match (token, param) {
        (Token::Bytes(bytes), ParamType::FixedBytes(size)) if bytes.len() <= *size => {
            let mut bytes = bytes;
            bytes.resize(*size, 0);
            Token::FixedBytes(bytes)
        }
        (Token::FixedBytes(bytes), ParamType::Bytes) => Token::Bytes(bytes),
        (Token::String(text), ParamType::Address) => Token::Address(
            text.trim()
                .trim_start_matches("0x")
                .parse::<Address>()
                .map_err(|_| AbiError::Encoding(format!("`{text}` is not an address")))?,
        ),
        (Token::Uint(value), ParamType::Int(_)) => Token::Int(value),
        (Token::Array(items), ParamType::Array(inner)) => Token::Array(
            items
                .into_iter()
                .map(|item| coerce(item, inner))
                .collect::<Result<_, _>>()?,
        ),
        (Token::Array(items) | Token::FixedArray(items), ParamType::FixedArray(inner, len))
            if items.len() == *len =>
        {
            Token::FixedArray(
                items
                    .into_iter()
                    .map(|item| coerce(item, inner))
                    .collect::<Result<_, _>>()?,
            )
        }
        (Token::Tuple(items), ParamType::Tuple(types)) if items.len() == types.len() => {
            Token::Tuple(
                items
                    .into_iter()
                    .zip(types)
                    .map(|(item, ty)| coerce(item, ty))
                    .collect::<Result<_, _>>()?,
            )
        }
        (token, _) => token,
    };

    if coerced.type_check(param) {
        Ok(coerced)
    } else {
        Err(AbiError::Encoding(format!(
            "value {coerced:?} does not match parameter type `{param}`"
        )))
    }
}

/// Extracts a human readable reason from revert data, if it carries one.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (head, payload) = data.split_at(4);
    if head == ERROR_STRING_SELECTOR {
        match abi::decode(&[ParamType::String], payload).ok()?.pop()? {
            Token::String(reason) => Some(reason),
            _ => None,
        }
    } else if head == PANIC_SELECTOR {
        match abi::decode(&[ParamType::Uint(256)], payload).ok()?.pop()? {
            Token::Uint(code) => Some(format!("panic code {code:#x}")),
            _ => None,
        }
    } else {
        None
    }
}

/// Parses a hex string (with or without `0x` prefix) into raw bytes.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, AbiError> {
    let trimmed = hex.trim().strip_prefix("0x").unwrap_or(hex.trim());
    Ok(Vec::from_hex(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> String {
        format!("{value:064x}")
    }

    fn address(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn function_hash_matches_known_selectors() {
        assert_eq!(function_hash("transfer(address,uint256)"), "a9059cbb");
        assert_eq!(function_hash("someName(address,uint256)"), "fac42a59");
        assert_eq!(function_hash("someName(address,uint256,uint256)"), "a67045bf");
        assert_eq!(
            function_hash("someName(address,uint256,bool,string,address[])"),
            "aef6af1c"
        );
    }

    #[test]
    fn function_hash_is_pure() {
        let sig = "mint(address[],uint256[])";
        assert_eq!(function_hash(sig), function_hash(sig));
        assert_ne!(function_hash(sig), function_hash("mint(address[],uint256)"));
    }

    #[test]
    fn canonical_signature_has_no_whitespace() {
        let sig = canonical_signature(
            "someName",
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Bool,
                ParamType::String,
                ParamType::Array(Box::new(ParamType::Address)),
            ],
        );
        assert_eq!(sig, "someName(address,uint256,bool,string,address[])");
    }

    #[test]
    fn parse_param_type_reads_common_types() {
        assert_eq!(parse_param_type("bool").unwrap(), ParamType::Bool);
        assert_eq!(parse_param_type(" uint256 ").unwrap(), ParamType::Uint(256));
        assert_eq!(
            parse_param_type("address[]").unwrap(),
            ParamType::Array(Box::new(ParamType::Address))
        );
        assert!(parse_param_type("notatype").is_err());
    }

    #[test]
    fn encode_parameters_skips_reserved_slots() {
        let encoded = encode_parameters(2, &[Token::Uint(U256::from(12345u64))]).unwrap();
        assert_eq!(encoded, word(12345));
    }

    #[test]
    fn encode_parameters_keeps_offsets_relative_to_full_arguments() {
        let array = create_array(vec![Token::Address(address(2)), Token::Address(address(3))])
            .unwrap();
        let encoded = encode_parameters(
            2,
            &[Token::Bool(true), Token::String("testme".into()), array],
        )
        .unwrap();

        // five head words in the full block put the string at 0xa0 and the array
        // two words later at 0xe0
        let mut testme = hex::encode("testme");
        testme.push_str(&"0".repeat(64 - testme.len()));
        let expected = [
            word(1),
            word(0xa0),
            word(0xe0),
            word(6),
            testme,
            word(2),
            format!("{:0>64}", hex::encode(address(2))),
            format!("{:0>64}", hex::encode(address(3))),
        ]
        .concat();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn encode_parameters_without_skip_matches_plain_encoding() {
        let values = [Token::Bool(false), Token::String("x".into())];
        let encoded = encode_parameters(0, &values).unwrap();
        assert_eq!(encoded, hex::encode(abi::encode(&values)));
    }

    #[test]
    fn create_array_rejects_mixed_elements() {
        let err = create_array(vec![Token::Address(address(1)), Token::Bool(true)]).unwrap_err();
        assert!(matches!(err, AbiError::Encoding(_)));
        assert_eq!(create_array(vec![]).unwrap(), Token::Array(vec![]));
    }

    #[test]
    fn encode_parameters_rejects_mixed_arrays() {
        let mixed = Token::Array(vec![Token::Uint(U256::one()), Token::String("a".into())]);
        assert!(matches!(
            encode_parameters(0, &[mixed]),
            Err(AbiError::Encoding(_))
        ));
    }

    #[test]
    fn round_trip_supported_types() {
        let values = vec![
            Token::Address(address(7)),
            Token::Uint(U256::from(20_000u64)),
            Token::Bool(true),
            Token::String("testme".into()),
            Token::Array(vec![Token::Address(address(2)), Token::Address(address(3))]),
        ];
        let types = values
            .iter()
            .map(param_type_of)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let data = hex_to_bytes(&encode_parameters(0, &values).unwrap()).unwrap();
        assert_eq!(decode(&types, &data).unwrap(), values);
    }

    #[test]
    fn decode_fails_on_short_data() {
        let err = decode(&[ParamType::Uint(256), ParamType::Bool], &[0u8; 40]).unwrap_err();
        assert!(matches!(err, AbiError::Decoding(_)));
    }

    #[test]
    fn coerce_converts_loose_values() {
        let selector = Token::Bytes(hex_to_bytes("fac42a59").unwrap());
        assert_eq!(
            coerce(selector, &ParamType::FixedBytes(4)).unwrap(),
            Token::FixedBytes(vec![0xfa, 0xc4, 0x2a, 0x59])
        );

        let addr = Token::String(format!("0x{}", hex::encode(address(9))));
        assert_eq!(
            coerce(addr, &ParamType::Address).unwrap(),
            Token::Address(address(9))
        );

        let values = Token::Array(vec![Token::Uint(U256::one())]);
        assert_eq!(
            coerce(values.clone(), &ParamType::Array(Box::new(ParamType::Uint(256)))).unwrap(),
            values
        );
    }

    #[test]
    fn coerce_rejects_mismatches() {
        assert!(coerce(Token::Bool(true), &ParamType::Uint(256)).is_err());
        assert!(coerce(Token::Bytes(vec![0; 5]), &ParamType::FixedBytes(4)).is_err());
    }

    #[test]
    fn revert_reason_is_decoded() {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(abi::encode(&[Token::String("not admin".into())]));
        assert_eq!(decode_revert_reason(&data).as_deref(), Some("not admin"));

        let mut panic = PANIC_SELECTOR.to_vec();
        panic.extend(abi::encode(&[Token::Uint(U256::from(0x11u64))]));
        assert_eq!(decode_revert_reason(&panic).as_deref(), Some("panic code 0x11"));

        assert_eq!(decode_revert_reason(&[]), None);
        assert_eq!(decode_revert_reason(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn hex_to_bytes_accepts_prefix() {
        assert_eq!(hex_to_bytes("0x0102").unwrap(), vec![1, 2]);
        assert_eq!(hex_to_bytes("0102").unwrap(), vec![1, 2]);
        assert!(matches!(hex_to_bytes("zz"), Err(AbiError::Hex(_))));
    }
}
