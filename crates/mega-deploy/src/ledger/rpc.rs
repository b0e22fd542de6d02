use alloy_json_rpc::{ErrorPayload, RpcError};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::{
    wire, Block, BlockTag, CallFailure, FetchedTransaction, LedgerClient, LedgerError,
    ResponseDecodeError, Result, TransactionRequest,
};
use crate::{RawStaticCallResult, TransactionReceipt};

/// Error message fragments that identify an execution failure.
const EXECUTION_FAILURE_MARKERS: &[&str] = &["execution reverted", "invalid opcode", "revert"];

/// Error message fragments of a transaction priced under the current base fee.
const FEE_TOO_LOW_MARKERS: &[&str] = &["less than block base fee", "fee cap less than base fee"];

/// A [`LedgerClient`] over Ethereum JSON-RPC on HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    client: RpcClient,
}

impl JsonRpcLedger {
    /// Connects to the endpoint at `url`.
    pub fn new(url: Url) -> Self {
        Self { client: ClientBuilder::default().http(url) }
    }

    async fn request(&self, method: &'static str, params: Value) -> Result<Value> {
        trace!(method, %params, "Sending RPC request");
        self.client
            .request::<Value, Value>(method, params)
            .await
            .map_err(|err| classify_error(method, err))
    }
}

/// Maps a transport error to a ledger error, turning execution failures into
/// [`LedgerError::Call`].
fn classify_error(method: &'static str, err: alloy_transport::TransportError) -> LedgerError {
    match err {
        RpcError::ErrorResp(payload) => classify_payload(method, &payload),
        RpcError::NullResp => ResponseDecodeError::Shape {
            method,
            expected: "a result",
            raw: "null".to_string(),
        }
        .into(),
        RpcError::DeserError { text, .. } => {
            ResponseDecodeError::Shape { method, expected: "a JSON-RPC response", raw: text }.into()
        }
        source => LedgerError::Transport { method, source },
    }
}

/// Classifies a JSON-RPC error object.
///
/// Nodes attach revert data either directly as `data: "0x…"` or nested as `data.data`, and
/// some attach the hash of a transaction that was mined despite the error as `data.txHash`.
pub(crate) fn classify_payload(method: &'static str, payload: &ErrorPayload) -> LedgerError {
    let data: Option<Value> =
        payload.data.as_ref().and_then(|raw| serde_json::from_str(raw.get()).ok());
    let revert_data = data.as_ref().and_then(|data| match data {
        Value::String(_) => wire::bytes(method, "data", data).ok(),
        Value::Object(map) => {
            map.get("data").and_then(|inner| wire::bytes(method, "data", inner).ok())
        }
        _ => None,
    });
    let tx_hash = data
        .as_ref()
        .and_then(|data| data.get("txHash").or_else(|| data.get("transactionHash")))
        .and_then(|hash| wire::hash(method, "txHash", hash).ok());

    let message = payload.message.to_string();
    let lowercase = message.to_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|marker| lowercase.contains(marker));
    let is_execution_failure = revert_data.is_some() || mentions(EXECUTION_FAILURE_MARKERS);

    debug!(method, code = payload.code, %message, is_execution_failure, "RPC request failed");
    if is_execution_failure {
        LedgerError::Call(CallFailure {
            custom_error_reported: lowercase.contains("custom error"),
            message,
            data: revert_data,
            tx_hash,
        })
    } else if tx_hash.is_none() && mentions(FEE_TOO_LOW_MARKERS) {
        LedgerError::FeeTooLow { method, message }
    } else {
        LedgerError::Rpc { method, code: payload.code, message, tx_hash }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn chain_id(&self) -> Result<u64> {
        let method = "eth_chainId";
        let value = self.request(method, json!([])).await?;
        Ok(wire::quantity_u64(method, "result", &value)?)
    }

    async fn latest_block(&self) -> Result<Block> {
        let method = "eth_getBlockByNumber";
        let value = self.request(method, json!(["latest", false])).await?;
        Ok(wire::block(method, &value)?)
    }

    async fn balance(&self, address: Address, block: BlockTag) -> Result<U256> {
        let method = "eth_getBalance";
        let value = self.request(method, json!([address, block.to_string()])).await?;
        Ok(wire::quantity_u256(method, "result", &value)?)
    }

    async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        self.request("hardhat_setBalance", json!([address, format!("{balance:#x}")])).await?;
        Ok(())
    }

    async fn gas_price(&self) -> Result<u128> {
        let method = "eth_gasPrice";
        let value = self.request(method, json!([])).await?;
        Ok(wire::quantity_u128(method, "result", &value)?)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        let method = "eth_estimateGas";
        let value = self.request(method, json!([wire::transaction_request(request)])).await?;
        Ok(wire::quantity_u64(method, "result", &value)?)
    }

    async fn call(
        &self,
        request: &TransactionRequest,
        block: BlockTag,
    ) -> Result<RawStaticCallResult> {
        let method = "eth_call";
        let params = json!([wire::transaction_request(request), block.to_string()]);
        match self.request(method, params).await {
            Ok(value) => Ok(RawStaticCallResult::success(wire::bytes(method, "result", &value)?)),
            Err(LedgerError::Call(failure)) => Ok(RawStaticCallResult {
                return_data: failure.data.unwrap_or_default(),
                success: false,
                custom_error_reported: failure.custom_error_reported,
            }),
            Err(err) => Err(err),
        }
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<B256> {
        let method = "eth_sendTransaction";
        let value = self.request(method, json!([wire::transaction_request(request)])).await?;
        Ok(wire::hash(method, "result", &value)?)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        let method = "eth_sendRawTransaction";
        let value = self.request(method, json!([raw])).await?;
        Ok(wire::hash(method, "result", &value)?)
    }

    async fn transaction_count(&self, address: Address, block: BlockTag) -> Result<u64> {
        let method = "eth_getTransactionCount";
        let value = self.request(method, json!([address, block.to_string()])).await?;
        Ok(wire::quantity_u64(method, "result", &value)?)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<FetchedTransaction>> {
        let method = "eth_getTransactionByHash";
        let value = self.request(method, json!([hash])).await?;
        Ok(wire::transaction(method, &value)?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let method = "eth_getTransactionReceipt";
        let value = self.request(method, json!([hash])).await?;
        Ok(wire::receipt(method, &value)?)
    }

    async fn code(&self, address: Address, block: BlockTag) -> Result<Bytes> {
        let method = "eth_getCode";
        let value = self.request(method, json!([address, block.to_string()])).await?;
        Ok(wire::bytes(method, "result", &value)?)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use serde_json::value::RawValue;

    use super::*;

    fn payload(message: &'static str, data: Option<&str>) -> ErrorPayload {
        ErrorPayload {
            code: -32000,
            message: Cow::Borrowed(message),
            data: data.map(|data| RawValue::from_string(data.to_string()).unwrap()),
        }
    }

    #[test]
    fn test_revert_with_inline_data() {
        let err =
            classify_payload("eth_call", &payload("execution reverted", Some(r#""0x08c379a0""#)));
        let LedgerError::Call(failure) = err else {
            panic!("expected a call failure, got {err:?}")
        };
        assert_eq!(failure.data, Some(Bytes::from_static(&[0x08, 0xc3, 0x79, 0xa0])));
        assert!(!failure.custom_error_reported);
    }

    #[test]
    fn test_nested_data_and_tx_hash() {
        let hash = B256::repeat_byte(9);
        let data = format!(r#"{{"message": "boom", "data": "0x1234", "txHash": "{hash}"}}"#);
        let err = classify_payload(
            "eth_sendTransaction",
            &payload(
                "VM Exception while processing transaction: reverted with custom error 'X()'",
                Some(&data),
            ),
        );
        assert_eq!(err.tx_hash(), Some(hash));
        let LedgerError::Call(failure) = err else { panic!("expected a call failure") };
        assert!(failure.custom_error_reported);
        assert_eq!(failure.data, Some(Bytes::from_static(&[0x12, 0x34])));
    }

    #[test]
    fn test_other_errors_stay_rpc_errors() {
        let err = classify_payload("eth_sendTransaction", &payload("nonce too low", None));
        assert!(matches!(err, LedgerError::Rpc { code: -32000, tx_hash: None, .. }));

        let err = classify_payload("eth_call", &payload("invalid opcode: INVALID", None));
        assert!(matches!(err, LedgerError::Call(CallFailure { data: None, .. })));
    }

    #[test]
    fn test_fees_under_base_fee() {
        let err = classify_payload(
            "eth_sendTransaction",
            &payload("max fee per gas less than block base fee: maxFeePerGas: 1", None),
        );
        assert!(matches!(err, LedgerError::FeeTooLow { method: "eth_sendTransaction", .. }));

        let message = "fee cap less than block base fee";
        let err = classify_payload("eth_sendRawTransaction", &payload(message, None));
        assert!(matches!(err, LedgerError::FeeTooLow { .. }));
        assert_eq!(err.tx_hash(), None);
    }
}
