//! Deployed contract handle and ABI call encoding.

use alloy_core::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Address, Bytes},
};

/// A contract instance bound to the address it was deployed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContractHandle {
    pub address: Address,
    pub abi: JsonAbi,
}

impl DeployedContractHandle {
    pub fn new(address: Address, abi: JsonAbi) -> Self {
        Self { address, abi }
    }

    /// Find `name` in the ABI, picking the overload that takes `arg_count` arguments.
    pub fn function(&self, name: &str, arg_count: usize) -> Result<&Function, String> {
        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| format!("function `{name}` is not in the contract ABI"))?;

        overloads
            .iter()
            .find(|function| function.inputs.len() == arg_count)
            .ok_or_else(|| {
                format!("function `{name}` has no overload taking {arg_count} argument(s)")
            })
    }

    /// ABI-encode a call to `name`, parsing each argument against its parameter type.
    pub fn encode_call(&self, name: &str, args: &[String]) -> Result<(Function, Bytes), String> {
        let function = self.function(name, args.len())?;
        let values = coerce_args(&function.inputs, args)?;
        let data = function
            .abi_encode_input(&values)
            .map_err(|e| format!("failed to encode `{name}` arguments: {e}"))?;
        Ok((function.clone(), data.into()))
    }
}

/// Encode the constructor arguments appended to the creation bytecode.
pub fn encode_constructor_args(abi: &JsonAbi, args: &[String]) -> Result<Vec<u8>, String> {
    match &abi.constructor {
        Some(constructor) => {
            if constructor.inputs.len() != args.len() {
                return Err(format!(
                    "constructor takes {} argument(s), got {}",
                    constructor.inputs.len(),
                    args.len()
                ));
            }
            let values = coerce_args(&constructor.inputs, args)?;
            constructor
                .abi_encode_input(&values)
                .map_err(|e| format!("failed to encode constructor arguments: {e}"))
        }
        None if args.is_empty() => Ok(Vec::new()),
        None => Err("contract has no constructor but arguments were given".to_string()),
    }
}

/// Decode the return data of `function`.
pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>, String> {
    function
        .abi_decode_output(data)
        .map_err(|e| format!("failed to decode `{}` output: {e}", function.name))
}

fn coerce_args(params: &[Param], args: &[String]) -> Result<Vec<DynSolValue>, String> {
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param
                .resolve()
                .map_err(|e| format!("unsupported parameter type `{}`: {e}", param.ty))?;
            ty.coerce_str(arg)
                .map_err(|e| format!("`{arg}` is not a valid {}: {e}", param.ty))
        })
        .collect()
}

/// Render decoded values the way a human reads them: `15`, `true`, `[1, 2]`.
pub fn format_values(values: &[DynSolValue]) -> String {
    match values {
        [single] => format_value(single),
        many => format!(
            "({})",
            many.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(b) => format!("0x{}", hex::encode(b)),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => format!(
            "[{}]",
            items.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
        DynSolValue::Tuple(items) => format!(
            "({})",
            items.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::U256;

    use super::*;

    fn handle() -> DeployedContractHandle {
        let abi: JsonAbi = serde_json::from_value(serde_json::json!([
            {
                "inputs": [],
                "name": "retrieve",
                "outputs": [{ "name": "", "type": "uint256" }],
                "stateMutability": "view",
                "type": "function"
            },
            {
                "inputs": [{ "name": "_favoriteNumber", "type": "uint256" }],
                "name": "store",
                "outputs": [],
                "stateMutability": "nonpayable",
                "type": "function"
            },
            {
                "inputs": [
                    { "name": "_name", "type": "string" },
                    { "name": "_favoriteNumber", "type": "uint256" }
                ],
                "name": "addPerson",
                "outputs": [],
                "stateMutability": "nonpayable",
                "type": "function"
            }
        ]))
        .unwrap();
        DeployedContractHandle::new(Address::ZERO, abi)
    }

    #[test]
    fn test_encode_store_call() {
        let (function, data) = handle().encode_call("store", &["15".to_string()]).unwrap();

        assert_eq!(function.name, "store");
        // store(uint256)
        assert_eq!(hex::encode(&data[..4]), "6057361d");
        assert_eq!(data.len(), 36);
        assert_eq!(U256::from_be_slice(&data[4..]), U256::from(15));
    }

    #[test]
    fn test_encode_retrieve_call() {
        let (_, data) = handle().encode_call("retrieve", &[]).unwrap();
        // retrieve()
        assert_eq!(hex::encode(&data), "2e64cec1");
    }

    #[test]
    fn test_encode_call_errors() {
        let handle = handle();
        assert!(handle.encode_call("missing", &[]).is_err());
        assert!(handle.encode_call("store", &[]).is_err());
        assert!(handle.encode_call("store", &["fifteen".to_string()]).is_err());
    }

    #[test]
    fn test_encode_multiple_args() {
        let (_, data) = handle()
            .encode_call("addPerson", &["alice".to_string(), "7".to_string()])
            .unwrap();
        // selector + offset + number + length + padded string
        assert_eq!(data.len(), 4 + 32 * 4);
    }

    #[test]
    fn test_decode_and_format_output() {
        let handle = handle();
        let function = handle.function("retrieve", 0).unwrap();
        let data = U256::from(15).to_be_bytes::<32>();

        let values = decode_output(function, &data).unwrap();
        assert_eq!(format_values(&values), "15");
    }

    #[test]
    fn test_format_values() {
        assert_eq!(format_values(&[DynSolValue::Bool(true)]), "true");
        assert_eq!(
            format_values(&[
                DynSolValue::Uint(U256::from(1), 256),
                DynSolValue::String("bob".to_string())
            ]),
            "(1, bob)"
        );
        assert_eq!(
            format_values(&[DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1), 8),
                DynSolValue::Uint(U256::from(2), 8)
            ])]),
            "[1, 2]"
        );
    }

    #[test]
    fn test_constructor_args() {
        assert!(encode_constructor_args(&handle().abi, &[]).unwrap().is_empty());
        assert!(encode_constructor_args(&handle().abi, &["1".to_string()]).is_err());
    }
}
