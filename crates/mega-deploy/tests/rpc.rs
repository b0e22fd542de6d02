//! The JSON-RPC ledger against a mocked HTTP endpoint.

use std::collections::HashMap;

use alloy_primitives::{address, b256, bytes, Address, U256};
use mega_deploy::{
    ledger::{BlockTag, JsonRpcLedger, LedgerClient, LedgerError, TransactionRequest},
    NetworkFees, ReceiptStatus,
};
use serde_json::{json, Value};
use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

const SENDER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

/// Answers every JSON-RPC request with the canned `result` or `error` of its method, echoing the
/// request id.
struct JsonRpc(HashMap<&'static str, Value>);

impl Respond for JsonRpc {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let method = body["method"].as_str().unwrap();
        let mut response = json!({ "jsonrpc": "2.0", "id": body["id"] });
        match self.0.get(method) {
            Some(Value::Object(canned)) if canned.contains_key("error") => {
                response["error"] = canned["error"].clone();
            }
            Some(result) => response["result"] = result.clone(),
            None => {
                let message = format!("method {method} not found");
                response["error"] = json!({ "code": -32601, "message": message });
            }
        }
        ResponseTemplate::new(200).set_body_json(response)
    }
}

async fn ledger(
    responses: impl IntoIterator<Item = (&'static str, Value)>,
) -> (MockServer, JsonRpcLedger) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(JsonRpc(responses.into_iter().collect()))
        .mount(&server)
        .await;
    let ledger = JsonRpcLedger::new(server.uri().parse().unwrap());
    (server, ledger)
}

#[tokio::test]
async fn test_reads_chain_state() {
    let (_server, ledger) = ledger([
        ("eth_chainId", json!("0x7a69")),
        (
            "eth_getBlockByNumber",
            json!({
                "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
                "number": "0x10",
                "baseFeePerGas": "0x3b9aca00"
            }),
        ),
        ("eth_getTransactionCount", json!("0x5")),
        ("eth_getCode", json!("0x6080")),
    ])
    .await;

    assert_eq!(ledger.chain_id().await.unwrap(), 31337);
    let block = ledger.latest_block().await.unwrap();
    assert_eq!(block.number, 16);
    assert_eq!(block.base_fee_per_gas, Some(1_000_000_000));
    assert_eq!(ledger.transaction_count(SENDER, BlockTag::Pending).await.unwrap(), 5);
    assert_eq!(ledger.code(SENDER, BlockTag::Latest).await.unwrap(), bytes!("6080"));
}

#[tokio::test]
async fn test_receipt_and_transaction_lookups() {
    let hash = b256!("2222222222222222222222222222222222222222222222222222222222222222");
    let (_server, ledger) = ledger([
        (
            "eth_getTransactionReceipt",
            json!({
                "transactionHash": hash,
                "blockHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
                "blockNumber": "0x2",
                "status": "0x1",
                "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "logs": []
            }),
        ),
        ("eth_getTransactionByHash", Value::Null),
    ])
    .await;

    let receipt = ledger.transaction_receipt(hash).await.unwrap().unwrap();
    assert_eq!(receipt.block_number, 2);
    assert_eq!(receipt.status, ReceiptStatus::Success);
    assert_eq!(
        receipt.contract_address,
        Some(address!("5fbdb2315678afecb367f032d93f642f64180aa3"))
    );
    assert!(ledger.transaction(hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_execution_failures() {
    let (_server, ledger) = ledger([
        (
            "eth_estimateGas",
            json!({
                "error": { "code": 3, "message": "execution reverted", "data": "0x82b42900" }
            }),
        ),
        (
            "eth_call",
            json!({
                "error": { "code": 3, "message": "execution reverted", "data": "0x82b42900" }
            }),
        ),
        ("eth_sendTransaction", json!({ "error": { "code": -32000, "message": "nonce too low" } })),
    ])
    .await;
    let request = TransactionRequest {
        from: SENDER,
        to: Some(Address::repeat_byte(1)),
        nonce: Some(0),
        fees: Some(NetworkFees::Legacy { gas_price: 1 }),
        ..Default::default()
    };

    let err = ledger.estimate_gas(&request).await.unwrap_err();
    let LedgerError::Call(failure) = err else {
        panic!("expected a call failure, got {err:?}")
    };
    assert_eq!(failure.data, Some(bytes!("82b42900")));

    // reverted calls are results, not errors
    let result = ledger.call(&request, BlockTag::Latest).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.return_data, bytes!("82b42900"));

    let err = ledger.send_transaction(&request).await.unwrap_err();
    assert!(matches!(err, LedgerError::Rpc { method: "eth_sendTransaction", tx_hash: None, .. }));
}

#[tokio::test]
async fn test_fees_under_base_fee() {
    let message = "max fee per gas less than block base fee: maxFeePerGas: 1, baseFee: 7";
    let (_server, ledger) = ledger([(
        "eth_sendTransaction",
        json!({ "error": { "code": -32000, "message": message } }),
    )])
    .await;
    let request = TransactionRequest {
        from: SENDER,
        to: Some(Address::repeat_byte(1)),
        nonce: Some(0),
        fees: Some(NetworkFees::Eip1559 { max_fee_per_gas: 1, max_priority_fee_per_gas: 1 }),
        ..Default::default()
    };

    let err = ledger.send_transaction(&request).await.unwrap_err();
    assert!(matches!(err, LedgerError::FeeTooLow { method: "eth_sendTransaction", .. }));
    assert_eq!(err.tx_hash(), None);
}

#[tokio::test]
async fn test_balance_quantities() {
    let (_server, ledger) = ledger([
        ("eth_getBalance", json!("0xde0b6b3a7640000")),
        ("eth_gasPrice", json!("0x77359400")),
    ])
    .await;
    assert_eq!(ledger.balance(SENDER, BlockTag::Latest).await.unwrap(), U256::from(10u128.pow(18)));
    assert_eq!(ledger.gas_price().await.unwrap(), 2_000_000_000);
}
