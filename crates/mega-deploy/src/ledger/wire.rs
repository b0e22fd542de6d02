//! Validation of JSON-RPC responses.
//!
//! Every decoder checks one field at a time and reports the first malformed one as a
//! [`ResponseDecodeError::InvalidField`] carrying the method, field name and raw value. Numeric
//! values must be `0x`-prefixed hexadecimal quantities.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::{Map, Value};

use super::{Block, FetchedTransaction, ResponseDecodeError, TransactionRequest};
use crate::{Log, NetworkFees, ReceiptStatus, TransactionReceipt};

type Result<T> = core::result::Result<T, ResponseDecodeError>;

fn invalid(method: &'static str, field: &'static str, raw: &Value) -> ResponseDecodeError {
    ResponseDecodeError::InvalidField { method, field, raw: raw.to_string() }
}

fn hex_digits(value: &Value) -> Option<&str> {
    value.as_str()?.strip_prefix("0x").filter(|digits| !digits.is_empty())
}

/// Decodes a quantity that fits in a `u64`.
pub fn quantity_u64(method: &'static str, field: &'static str, value: &Value) -> Result<u64> {
    hex_digits(value)
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .ok_or_else(|| invalid(method, field, value))
}

/// Decodes a quantity that fits in a `u128`.
pub fn quantity_u128(method: &'static str, field: &'static str, value: &Value) -> Result<u128> {
    hex_digits(value)
        .and_then(|digits| u128::from_str_radix(digits, 16).ok())
        .ok_or_else(|| invalid(method, field, value))
}

/// Decodes a 256-bit quantity.
pub fn quantity_u256(method: &'static str, field: &'static str, value: &Value) -> Result<U256> {
    hex_digits(value)
        .and_then(|digits| U256::from_str_radix(digits, 16).ok())
        .ok_or_else(|| invalid(method, field, value))
}

/// Decodes a 32-byte hash.
pub fn hash(method: &'static str, field: &'static str, value: &Value) -> Result<B256> {
    value.as_str().and_then(|s| s.parse().ok()).ok_or_else(|| invalid(method, field, value))
}

/// Decodes an address.
pub fn address(method: &'static str, field: &'static str, value: &Value) -> Result<Address> {
    value.as_str().and_then(|s| s.parse().ok()).ok_or_else(|| invalid(method, field, value))
}

/// Decodes hex data.
pub fn bytes(method: &'static str, field: &'static str, value: &Value) -> Result<Bytes> {
    value
        .as_str()
        .filter(|s| s.starts_with("0x"))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid(method, field, value))
}

fn object<'a>(
    method: &'static str,
    expected: &'static str,
    value: &'a Value,
) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| ResponseDecodeError::Shape {
        method,
        expected,
        raw: value.to_string(),
    })
}

fn field<'a>(
    method: &'static str,
    map: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a Value> {
    match map.get(name) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(invalid(method, name, &Value::Null)),
    }
}

fn optional_field<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    map.get(name).filter(|value| !value.is_null())
}

/// Decodes a block header.
pub fn block(method: &'static str, value: &Value) -> Result<Block> {
    let map = object(method, "a block", value)?;
    Ok(Block {
        hash: hash(method, "hash", field(method, map, "hash")?)?,
        number: quantity_u64(method, "number", field(method, map, "number")?)?,
        base_fee_per_gas: optional_field(map, "baseFeePerGas")
            .map(|fee| quantity_u128(method, "baseFeePerGas", fee))
            .transpose()?,
    })
}

/// Decodes transaction fees, preferring the EIP-1559 fields when present.
pub fn fees(method: &'static str, map: &Map<String, Value>) -> Result<NetworkFees> {
    if let Some(max_fee) = optional_field(map, "maxFeePerGas") {
        return Ok(NetworkFees::Eip1559 {
            max_fee_per_gas: quantity_u128(method, "maxFeePerGas", max_fee)?,
            max_priority_fee_per_gas: quantity_u128(
                method,
                "maxPriorityFeePerGas",
                field(method, map, "maxPriorityFeePerGas")?,
            )?,
        });
    }
    Ok(NetworkFees::Legacy {
        gas_price: quantity_u128(method, "gasPrice", field(method, map, "gasPrice")?)?,
    })
}

/// Decodes a transaction lookup, `null` meaning unknown.
pub fn transaction(method: &'static str, value: &Value) -> Result<Option<FetchedTransaction>> {
    if value.is_null() {
        return Ok(None);
    }
    let map = object(method, "a transaction or null", value)?;
    Ok(Some(FetchedTransaction {
        hash: hash(method, "hash", field(method, map, "hash")?)?,
        nonce: quantity_u64(method, "nonce", field(method, map, "nonce")?)?,
        block_number: optional_field(map, "blockNumber")
            .map(|number| quantity_u64(method, "blockNumber", number))
            .transpose()?,
        fees: fees(method, map)?,
    }))
}

/// Decodes a receipt lookup, `null` meaning not mined.
pub fn receipt(method: &'static str, value: &Value) -> Result<Option<TransactionReceipt>> {
    if value.is_null() {
        return Ok(None);
    }
    let map = object(method, "a receipt or null", value)?;
    // Some nodes return receipts of pending transactions without a block.
    if optional_field(map, "blockNumber").is_none() {
        return Ok(None);
    }

    let status = match quantity_u64(method, "status", field(method, map, "status")?)? {
        1 => ReceiptStatus::Success,
        0 => ReceiptStatus::Failure,
        _ => return Err(invalid(method, "status", &map["status"])),
    };
    let logs = field(method, map, "logs")?
        .as_array()
        .ok_or_else(|| invalid(method, "logs", &map["logs"]))?
        .iter()
        .map(|log| {
            let log_map = object(method, "a log", log)?;
            let topics = field(method, log_map, "topics")?
                .as_array()
                .ok_or_else(|| invalid(method, "topics", &log_map["topics"]))?
                .iter()
                .map(|topic| hash(method, "topics", topic))
                .collect::<Result<Vec<_>>>()?;
            Ok(Log {
                address: address(method, "address", field(method, log_map, "address")?)?,
                log_index: quantity_u64(method, "logIndex", field(method, log_map, "logIndex")?)?,
                data: bytes(method, "data", field(method, log_map, "data")?)?,
                topics,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(TransactionReceipt {
        block_hash: hash(method, "blockHash", field(method, map, "blockHash")?)?,
        block_number: quantity_u64(method, "blockNumber", field(method, map, "blockNumber")?)?,
        status,
        contract_address: optional_field(map, "contractAddress")
            .map(|value| address(method, "contractAddress", value))
            .transpose()?,
        logs,
    }))
}

fn quantity(value: impl core::fmt::LowerHex) -> Value {
    Value::String(format!("{value:#x}"))
}

/// Encodes a transaction request as a JSON-RPC transaction object.
pub fn transaction_request(request: &TransactionRequest) -> Value {
    let mut map = Map::new();
    map.insert("from".into(), Value::String(request.from.to_string()));
    if let Some(to) = request.to {
        map.insert("to".into(), Value::String(to.to_string()));
    }
    map.insert("data".into(), Value::String(request.data.to_string()));
    map.insert("value".into(), quantity(request.value));
    if let Some(nonce) = request.nonce {
        map.insert("nonce".into(), quantity(nonce));
    }
    if let Some(gas) = request.gas {
        map.insert("gas".into(), quantity(gas));
    }
    match request.fees {
        Some(NetworkFees::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas }) => {
            map.insert("maxFeePerGas".into(), quantity(max_fee_per_gas));
            map.insert("maxPriorityFeePerGas".into(), quantity(max_priority_fee_per_gas));
        }
        Some(NetworkFees::Legacy { gas_price }) => {
            map.insert("gasPrice".into(), quantity(gas_price));
        }
        None => {}
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_quantities_must_be_hex() {
        assert_eq!(quantity_u64("m", "f", &json!("0x1f")).unwrap(), 31);
        for bad in [json!(31), json!("31"), json!("0x"), json!("0xzz"), json!(null)] {
            assert_eq!(
                quantity_u64("m", "f", &bad).unwrap_err(),
                ResponseDecodeError::InvalidField { method: "m", field: "f", raw: bad.to_string() }
            );
        }
        assert_eq!(
            quantity_u256("m", "f", &json!("0x0de0b6b3a7640000")).unwrap(),
            U256::from(10u128.pow(18))
        );
    }

    #[test]
    fn test_block_with_and_without_base_fee() {
        let hash = B256::repeat_byte(1);
        let london = block(
            "eth_getBlockByNumber",
            &json!({"hash": hash, "number": "0x10", "baseFeePerGas": "0x7"}),
        )
        .unwrap();
        assert_eq!(london, Block { hash, number: 16, base_fee_per_gas: Some(7) });

        let legacy =
            block("eth_getBlockByNumber", &json!({"hash": hash, "number": "0x10"})).unwrap();
        assert_eq!(legacy.base_fee_per_gas, None);

        assert!(matches!(
            block("eth_getBlockByNumber", &json!("0x1")),
            Err(ResponseDecodeError::Shape { .. })
        ));
        assert!(matches!(
            block("eth_getBlockByNumber", &json!({"hash": hash, "number": 16})),
            Err(ResponseDecodeError::InvalidField { field: "number", .. })
        ));
    }

    #[test]
    fn test_transaction_fee_shapes() {
        let hash = B256::repeat_byte(2);
        let dynamic = transaction(
            "eth_getTransactionByHash",
            &json!({
                "hash": hash, "nonce": "0x3", "blockNumber": null,
                "gasPrice": "0x5", "maxFeePerGas": "0x9", "maxPriorityFeePerGas": "0x1"
            }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(dynamic.nonce, 3);
        assert_eq!(dynamic.block_number, None);
        assert_eq!(
            dynamic.fees,
            NetworkFees::Eip1559 { max_fee_per_gas: 9, max_priority_fee_per_gas: 1 }
        );

        let legacy = transaction(
            "eth_getTransactionByHash",
            &json!({"hash": hash, "nonce": "0x3", "blockNumber": "0x4", "gasPrice": "0x5"}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(legacy.fees, NetworkFees::Legacy { gas_price: 5 });
        assert_eq!(legacy.block_number, Some(4));

        assert_eq!(transaction("eth_getTransactionByHash", &Value::Null).unwrap(), None);
    }

    #[test]
    fn test_receipt() {
        let emitter = Address::repeat_byte(0xee);
        let decoded = receipt(
            "eth_getTransactionReceipt",
            &json!({
                "blockHash": B256::repeat_byte(3),
                "blockNumber": "0x2a",
                "status": "0x1",
                "contractAddress": Address::repeat_byte(0xcc),
                "logs": [{
                    "address": emitter,
                    "logIndex": "0x0",
                    "data": "0x01",
                    "topics": [B256::ZERO]
                }]
            }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(decoded.block_number, 42);
        assert!(decoded.is_success());
        assert_eq!(decoded.contract_address, Some(Address::repeat_byte(0xcc)));
        assert_eq!(decoded.logs[0].address, emitter);
        assert_eq!(decoded.logs[0].data, Bytes::from_static(&[1]));

        let err = receipt(
            "eth_getTransactionReceipt",
            &json!({"blockHash": B256::ZERO, "blockNumber": "0x1", "status": "0x2", "logs": []}),
        )
        .unwrap_err();
        assert!(matches!(err, ResponseDecodeError::InvalidField { field: "status", .. }));
    }

    #[test]
    fn test_transaction_request_encoding() {
        let request = TransactionRequest {
            from: Address::repeat_byte(1),
            to: None,
            data: Bytes::from_static(&[0xab]),
            value: U256::from(16),
            nonce: Some(2),
            gas: None,
            fees: Some(NetworkFees::Legacy { gas_price: 255 }),
        };
        let encoded = transaction_request(&request);
        assert_eq!(encoded["value"], "0x10");
        assert_eq!(encoded["nonce"], "0x2");
        assert_eq!(encoded["gasPrice"], "0xff");
        assert_eq!(encoded["data"], "0xab");
        assert!(encoded.get("to").is_none());
    }
}
