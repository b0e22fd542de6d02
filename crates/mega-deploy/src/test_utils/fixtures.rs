use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256};

use crate::{
    strategy::BasicStrategy, Artifact, ExecutionKind, ExecutionState, ExecutionStatus, FutureType,
    NameOrIndex, NetworkFees, NetworkInteraction, NetworkInteractionRequest, RawStaticCallResult,
    ReceiptStatus, StrategyConfig, Transaction, TransactionReceipt,
};

/// First development account, the default sender.
pub const DEPLOYER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

/// Second development account.
pub const SECOND_ACCOUNT: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");

/// The development accounts, in order.
pub fn accounts() -> Vec<Address> {
    vec![DEPLOYER, SECOND_ACCOUNT]
}

/// A counter contract: `constructor(uint256)`, `increment()`, `setCount(uint256)`,
/// `count() returns (uint256 value)`, `event Incremented(address indexed by, uint256 value)` and
/// `error Unauthorized(address caller)`.
pub fn counter_artifact() -> Artifact {
    serde_json::from_value(serde_json::json!({
        "contractName": "Counter",
        "bytecode": "0x6080604052348015600f57600080fd5b50603f80601d6000396000f3fe",
        "abi": [
            {
                "type": "constructor",
                "inputs": [{"name": "initial", "type": "uint256", "internalType": "uint256"}],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "increment",
                "inputs": [],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "setCount",
                "inputs": [{"name": "value", "type": "uint256", "internalType": "uint256"}],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "count",
                "inputs": [],
                "outputs": [{"name": "value", "type": "uint256", "internalType": "uint256"}],
                "stateMutability": "view"
            },
            {
                "type": "event",
                "name": "Incremented",
                "inputs": [
                    {"name": "by", "type": "address", "indexed": true,
                     "internalType": "address"},
                    {"name": "value", "type": "uint256", "indexed": false,
                     "internalType": "uint256"}
                ],
                "anonymous": false
            },
            {
                "type": "error",
                "name": "Unauthorized",
                "inputs": [{"name": "caller", "type": "address", "internalType": "address"}]
            }
        ]
    }))
    .unwrap()
}

/// A library and a contract linking it.
pub fn library_artifacts() -> [Artifact; 2] {
    let math = serde_json::from_value(serde_json::json!({
        "contractName": "Math",
        "bytecode": "0x60806040526000",
        "abi": []
    }))
    .unwrap();
    let uses_math = serde_json::from_value(serde_json::json!({
        "contractName": "UsesMath",
        "bytecode": "0x6073__$a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7$__6000",
        "abi": [],
        "linkReferences": {
            "contracts/Math.sol": {"Math": [{"start": 2, "length": 20}]}
        }
    }))
    .unwrap();
    [math, uses_math]
}

/// The test artifacts by id.
pub fn artifacts() -> BTreeMap<String, Artifact> {
    let [math, uses_math] = library_artifacts();
    [counter_artifact(), math, uses_math]
        .into_iter()
        .map(|artifact| (artifact.contract_name.clone(), artifact))
        .collect()
}

/// Revert data of `Unauthorized(caller)`.
pub fn unauthorized_error(caller: Address) -> Bytes {
    let mut data = keccak256("Unauthorized(address)")[..4].to_vec();
    data.extend_from_slice(caller.into_word().as_slice());
    data.into()
}

/// Log data and topics of `Incremented(by, value)`.
pub fn incremented_log(by: Address, value: u64) -> (Vec<B256>, Bytes) {
    let topics = vec![keccak256("Incremented(address,uint256)"), by.into_word()];
    (topics, U256::from(value).to_be_bytes::<32>().to_vec().into())
}

/// A receipt in block 1 without logs.
pub fn receipt(success: bool, contract_address: Option<Address>) -> TransactionReceipt {
    TransactionReceipt {
        block_hash: B256::repeat_byte(0xbb),
        block_number: 1,
        status: if success { ReceiptStatus::Success } else { ReceiptStatus::Failure },
        contract_address,
        logs: Vec::new(),
    }
}

/// A started execution state sent from [`DEPLOYER`] by the basic strategy.
pub fn execution_state(id: &str, future_type: FutureType, kind: ExecutionKind) -> ExecutionState {
    ExecutionState {
        id: id.to_string(),
        future_type,
        strategy: BasicStrategy::NAME.to_string(),
        strategy_config: StrategyConfig::default(),
        status: ExecutionStatus::Started,
        dependencies: BTreeSet::new(),
        from: Some(DEPLOYER),
        kind,
        network_interactions: Vec::new(),
        result: None,
    }
}

/// A started deployment of `artifact_id`.
pub fn deployment_state(id: &str, artifact_id: &str, args: &[&str]) -> ExecutionState {
    execution_state(
        id,
        FutureType::ContractDeployment,
        ExecutionKind::Deployment {
            artifact_id: artifact_id.to_string(),
            constructor_args: args.iter().map(ToString::to_string).collect(),
            libraries: BTreeMap::new(),
            value: U256::ZERO,
        },
    )
}

/// A started call of a `Counter` function.
pub fn call_state(id: &str, contract: Address, function: &str, args: &[&str]) -> ExecutionState {
    execution_state(
        id,
        FutureType::ContractCall,
        ExecutionKind::Call {
            contract_address: contract,
            artifact_id: "Counter".to_string(),
            function_name: function.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            value: U256::ZERO,
        },
    )
}

/// A started static call of a `Counter` function.
pub fn static_call_state(
    id: &str,
    contract: Address,
    function: &str,
    name_or_index: Option<NameOrIndex>,
) -> ExecutionState {
    execution_state(
        id,
        FutureType::StaticCall,
        ExecutionKind::StaticCall {
            contract_address: contract,
            artifact_id: "Counter".to_string(),
            function_name: function.to_string(),
            args: Vec::new(),
            name_or_index,
        },
    )
}

/// Adds the onchain interaction of `request` to `state`, confirmed by a single transaction.
pub fn confirm(
    state: &mut ExecutionState,
    request: NetworkInteractionRequest,
    hash: B256,
    receipt: TransactionReceipt,
) {
    let NetworkInteraction::OnchainInteraction(mut interaction) = request.into_interaction() else {
        panic!("not an onchain interaction request");
    };
    interaction.nonce = Some(state.onchain_interactions().count() as u64);
    interaction.transactions.push(Transaction {
        hash,
        fees: NetworkFees::Legacy { gas_price: 1_000_000_000 },
        receipt: Some(receipt),
    });
    state.network_interactions.push(NetworkInteraction::OnchainInteraction(interaction));
}

/// Adds the static call of `request` to `state`, completed with `result`.
pub fn complete_static_call(
    state: &mut ExecutionState,
    request: NetworkInteractionRequest,
    result: RawStaticCallResult,
) {
    let NetworkInteraction::StaticCall(mut call) = request.into_interaction() else {
        panic!("not a static call request");
    };
    call.result = Some(result);
    state.network_interactions.push(NetworkInteraction::StaticCall(call));
}
