//! ABI helpers: argument encoding, result and event decoding, and revert classification.
//!
//! The ABI codec itself is `alloy-dyn-abi`; this module only adapts it to the string-valued
//! arguments and results stored in execution states.

use alloy_dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier};
use alloy_json_abi::{Event, Function, JsonAbi};
use alloy_primitives::{hex, Address, Bytes, FixedBytes};
use alloy_sol_types::{Panic, Revert, SolError};

use crate::{EvmExecutionFailure, Log, NameOrIndex};

/// Errors of ABI encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    /// The ABI has no function with this name or signature.
    #[error("function {0} not found in ABI")]
    FunctionNotFound(String),
    /// The name matches overloads with the same number of parameters; a signature is required.
    #[error("function {0} is overloaded, use its full signature")]
    AmbiguousFunction(String),
    /// The ABI has no event with this name or signature.
    #[error("event {0} not found in ABI")]
    EventNotFound(String),
    /// Wrong number of arguments.
    #[error("{name} expects {expected} arguments, got {got}")]
    ArgumentCount {
        /// Function name, or `constructor`.
        name: String,
        /// Number of parameters.
        expected: usize,
        /// Number of arguments.
        got: usize,
    },
    /// An argument could not be coerced to its parameter type.
    #[error("argument {index} ({value:?}) is not a valid {ty}: {source}")]
    InvalidArgument {
        /// Argument position.
        index: usize,
        /// Parameter type.
        ty: String,
        /// Argument value.
        value: String,
        /// Coercion error.
        source: alloy_dyn_abi::Error,
    },
    /// The selected value does not exist.
    #[error("no value {0} in decoded result")]
    ValueNotFound(String),
    /// The requested occurrence of the event is not in the logs.
    #[error("event {name} #{index} not emitted by {emitter}")]
    LogNotFound {
        /// Event name.
        name: String,
        /// Requested occurrence.
        index: usize,
        /// Expected emitter.
        emitter: Address,
    },
    /// The codec failed.
    #[error(transparent)]
    Codec(#[from] alloy_dyn_abi::Error),
}

/// Decodes contract-reported custom errors using the errors of an ABI.
///
/// The engine never knows any contract ABI; strategies hand it a decoder for the future being
/// executed.
#[derive(Debug, Clone, Default)]
pub struct ErrorDecoder {
    errors: Vec<alloy_json_abi::Error>,
}

impl ErrorDecoder {
    /// A decoder that knows no custom errors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A decoder for the errors declared in `abi`.
    pub fn from_abi(abi: &JsonAbi) -> Self {
        Self { errors: abi.errors().cloned().collect() }
    }

    /// Classifies revert data.
    pub fn decode(&self, data: &[u8]) -> EvmExecutionFailure {
        if data.is_empty() {
            return EvmExecutionFailure::RevertWithoutReason;
        }
        if data.len() < 4 {
            return invalid_data(data);
        }

        let selector = FixedBytes::<4>::from_slice(&data[..4]);
        if selector == Revert::SELECTOR {
            return match Revert::abi_decode(data, true) {
                Ok(revert) => EvmExecutionFailure::RevertWithReason { message: revert.reason },
                Err(_) => invalid_data(data),
            };
        }
        if selector == Panic::SELECTOR {
            return match Panic::abi_decode(data, true) {
                Ok(panic) => EvmExecutionFailure::RevertWithPanicCode {
                    code: panic.code,
                    name: panic
                        .kind()
                        .map_or_else(|| "unknown panic code".to_string(), |kind| kind.to_string()),
                },
                Err(_) => invalid_data(data),
            };
        }

        let Some(error) = self.errors.iter().find(|error| error.selector() == selector) else {
            return EvmExecutionFailure::RevertWithUnknownCustomError {
                selector,
                data: Bytes::copy_from_slice(data),
            };
        };
        match error.abi_decode_input(&data[4..], true) {
            Ok(values) => EvmExecutionFailure::RevertWithCustomError {
                name: error.name.clone(),
                args: values.iter().map(format_sol_value).collect(),
            },
            Err(_) => invalid_data(data),
        }
    }
}

fn invalid_data(data: &[u8]) -> EvmExecutionFailure {
    EvmExecutionFailure::RevertWithInvalidData { data: Bytes::copy_from_slice(data) }
}

/// Finds a function by name, or by full signature when the name contains a `(`.
pub fn find_function<'a>(
    abi: &'a JsonAbi,
    name: &str,
    args: usize,
) -> Result<&'a Function, AbiError> {
    if name.contains('(') {
        return abi
            .functions()
            .find(|function| function.signature() == name)
            .ok_or_else(|| AbiError::FunctionNotFound(name.to_string()));
    }
    let overloads = abi.function(name).ok_or_else(|| AbiError::FunctionNotFound(name.to_string()))?;
    if let [function] = overloads.as_slice() {
        return Ok(function);
    }
    let mut matching = overloads.iter().filter(|function| function.inputs.len() == args);
    match (matching.next(), matching.next()) {
        (Some(function), None) => Ok(function),
        (Some(_), Some(_)) => Err(AbiError::AmbiguousFunction(name.to_string())),
        (None, _) => Err(AbiError::FunctionNotFound(name.to_string())),
    }
}

/// Finds an event by name, or by full signature when the name contains a `(`.
pub fn find_event<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Event, AbiError> {
    let found = if name.contains('(') {
        abi.events().find(|event| event.signature() == name)
    } else {
        abi.event(name).and_then(|events| events.first())
    };
    found.ok_or_else(|| AbiError::EventNotFound(name.to_string()))
}

fn coerce_args<'a>(
    name: &str,
    params: impl ExactSizeIterator<Item = &'a alloy_json_abi::Param>,
    args: &[String],
) -> Result<Vec<DynSolValue>, AbiError> {
    if params.len() != args.len() {
        return Err(AbiError::ArgumentCount {
            name: name.to_string(),
            expected: params.len(),
            got: args.len(),
        });
    }
    params
        .zip(args)
        .enumerate()
        .map(|(index, (param, value))| {
            let ty: DynSolType = param.resolve()?;
            ty.coerce_str(value).map_err(|source| AbiError::InvalidArgument {
                index,
                ty: ty.sol_type_name().into_owned(),
                value: value.clone(),
                source,
            })
        })
        .collect()
}

/// Encodes a call of `name` with string arguments.
pub fn encode_function_call(abi: &JsonAbi, name: &str, args: &[String]) -> Result<Bytes, AbiError> {
    let function = find_function(abi, name, args.len())?;
    let values = coerce_args(&function.name, function.inputs.iter(), args)?;
    Ok(function.abi_encode_input(&values)?.into())
}

/// Encodes constructor arguments, without the creation code.
pub fn encode_constructor_args(abi: &JsonAbi, args: &[String]) -> Result<Bytes, AbiError> {
    let Some(constructor) = abi.constructor() else {
        if args.is_empty() {
            return Ok(Bytes::new());
        }
        return Err(AbiError::ArgumentCount {
            name: "constructor".to_string(),
            expected: 0,
            got: args.len(),
        });
    };
    let values = coerce_args("constructor", constructor.inputs.iter(), args)?;
    Ok(constructor.abi_encode_input(&values)?.into())
}

/// Decodes the return data of `name` and selects one value, the first one when `select` is
/// `None`.
pub fn decode_function_result(
    abi: &JsonAbi,
    name: &str,
    args: usize,
    data: &[u8],
    select: Option<&NameOrIndex>,
) -> Result<String, AbiError> {
    let function = find_function(abi, name, args)?;
    let values = function.abi_decode_output(data, true)?;
    let names: Vec<&str> = function.outputs.iter().map(|param| param.name.as_str()).collect();
    select_value(&names, &values, select.unwrap_or(&NameOrIndex::Index(0)))
}

/// Decodes one argument of the `index`-th `event` emitted by `emitter` among `logs`.
pub fn decode_event_argument(
    event: &Event,
    logs: &[Log],
    emitter: Address,
    index: usize,
    select: &NameOrIndex,
) -> Result<String, AbiError> {
    let selector = event.selector();
    let log = logs
        .iter()
        .filter(|log| log.address == emitter)
        .filter(|log| event.anonymous || log.topics.first() == Some(&selector))
        .nth(index)
        .ok_or_else(|| AbiError::LogNotFound { name: event.name.clone(), index, emitter })?;

    let decoded = event.decode_log_parts(log.topics.iter().copied(), &log.data, true)?;
    let (mut indexed, mut body) = (decoded.indexed.into_iter(), decoded.body.into_iter());
    let mut values = Vec::with_capacity(event.inputs.len());
    for input in &event.inputs {
        let value = if input.indexed { indexed.next() } else { body.next() };
        values.push(value.ok_or_else(|| AbiError::ValueNotFound(input.name.clone()))?);
    }
    let names: Vec<&str> = event.inputs.iter().map(|input| input.name.as_str()).collect();
    select_value(&names, &values, select)
}

fn select_value(
    names: &[&str],
    values: &[DynSolValue],
    select: &NameOrIndex,
) -> Result<String, AbiError> {
    let position = match select {
        NameOrIndex::Index(index) => Some(*index),
        NameOrIndex::Name(name) => names.iter().position(|candidate| candidate == name),
    };
    position
        .and_then(|position| values.get(position))
        .map(format_sol_value)
        .ok_or_else(|| AbiError::ValueNotFound(select.to_string()))
}

/// Renders a value so that it can be coerced back with [`DynSolType::coerce_str`].
pub fn format_sol_value(value: &DynSolValue) -> String {
    format_value(value, false)
}

fn format_value(value: &DynSolValue, nested: bool) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Function(function) => function.to_string(),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) if nested => format!("{s:?}"),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            format!("[{}]", format_items(items))
        }
        DynSolValue::Tuple(items) => format!("({})", format_items(items)),
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

fn format_items(items: &[DynSolValue]) -> String {
    items.iter().map(|item| format_value(item, true)).collect::<Vec<_>>().join(", ")
}
