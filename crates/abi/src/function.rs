use ethers_core::abi::{ParamType, Token};

use crate::{
    codec::{canonical_signature, decode, encode_call, param_type_of, parse_param_type},
    AbiError,
};

/// Describes a function call independently of any contract ABI: the name, the input
/// values and the declared output types.
///
/// ```
/// use solbench_abi::FunctionSpec;
///
/// let spec = FunctionSpec::new("mintingDone").output("bool");
/// assert_eq!(spec.signature().unwrap(), "mintingDone()");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    name: String,
    inputs: Vec<Token>,
    outputs: Vec<String>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, value: Token) -> Self {
        self.inputs.push(value);
        self
    }

    /// Appends a declared output type, e.g. `"bool"` or `"address[]"`. The type is
    /// validated when the spec is used.
    pub fn output(mut self, ty: impl Into<String>) -> Self {
        self.outputs.push(ty.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Token] {
        &self.inputs
    }

    /// Canonical signature inferred from the input values.
    pub fn signature(&self) -> Result<String, AbiError> {
        let params = self
            .inputs
            .iter()
            .map(param_type_of)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(canonical_signature(&self.name, &params))
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    pub fn output_types(&self) -> Result<Vec<ParamType>, AbiError> {
        self.outputs.iter().map(|ty| parse_param_type(ty)).collect()
    }

    /// Selector followed by the encoded inputs.
    pub fn encode_input(&self) -> Result<Vec<u8>, AbiError> {
        encode_call(&self.signature()?, &self.inputs)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        decode(&self.output_types()?, data)
    }
}
