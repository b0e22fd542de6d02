use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::{
    constants::CREATE2_FACTORY_ADDRESS,
    ledger::{
        Block, BlockTag, CallFailure, FetchedTransaction, LedgerClient, LedgerError, Result,
        TransactionRequest,
    },
    Log, NetworkFees, PresignedDeployment, RawStaticCallResult, ReceiptStatus, TransactionReceipt,
};

/// A transaction known to the [`MockLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransaction {
    /// Hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Option<Address>,
    /// Nonce.
    pub nonce: u64,
    /// Calldata or init code.
    pub data: Bytes,
    /// Value.
    pub value: U256,
    /// Fees.
    pub fees: NetworkFees,
}

#[derive(Debug)]
struct MockChain {
    chain_id: u64,
    block_number: u64,
    base_fee: Option<u128>,
    gas_price: u128,
    automine: bool,
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    nonces: HashMap<Address, u64>,
    mempool: BTreeMap<(Address, u64), MockTransaction>,
    mined: HashMap<B256, (MockTransaction, TransactionReceipt)>,
    reverting: HashMap<Option<Address>, Bytes>,
    failing_when_mined: HashSet<Option<Address>>,
    call_results: HashMap<Address, Bytes>,
    logs: HashMap<Option<Address>, Vec<(Vec<B256>, Bytes)>>,
    next_hashes: VecDeque<B256>,
    fail_next_send_with_hash: bool,
    base_fee_on_next_send: Option<u128>,
    sent: Vec<MockTransaction>,
    requests: BTreeMap<&'static str, usize>,
    hash_counter: u64,
}

/// An in-memory chain implementing [`LedgerClient`].
///
/// Transactions are mined immediately by default. With automining disabled they wait in a mempool
/// until [`MockLedger::mine`] is called, and can be dropped, replaced by fee or front-run by
/// transactions from outside the engine.
#[derive(Debug)]
pub struct MockLedger {
    chain: Mutex<MockChain>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new(31337)
    }
}

impl MockLedger {
    /// An empty automining chain with a 1 gwei base fee.
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain: Mutex::new(MockChain {
                chain_id,
                block_number: 0,
                base_fee: Some(1_000_000_000),
                gas_price: 2_000_000_000,
                automine: true,
                balances: HashMap::new(),
                code: HashMap::new(),
                nonces: HashMap::new(),
                mempool: BTreeMap::new(),
                mined: HashMap::new(),
                reverting: HashMap::new(),
                failing_when_mined: HashSet::new(),
                call_results: HashMap::new(),
                logs: HashMap::new(),
                next_hashes: VecDeque::new(),
                fail_next_send_with_hash: false,
                base_fee_on_next_send: None,
                sent: Vec::new(),
                requests: BTreeMap::new(),
                hash_counter: 0,
            }),
        }
    }

    fn chain(&self) -> MutexGuard<'_, MockChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enables or disables mining on every submission.
    pub fn set_automine(&self, automine: bool) {
        self.chain().automine = automine;
    }

    /// Disables automining.
    pub fn manual_mining(self) -> Self {
        self.set_automine(false);
        self
    }

    /// Sets the base fee; `None` makes the chain pre-London.
    pub fn set_base_fee(&self, base_fee: Option<u128>) {
        self.chain().base_fee = base_fee;
    }

    /// Sets the legacy gas price.
    pub fn set_gas_price(&self, gas_price: u128) {
        self.chain().gas_price = gas_price;
    }

    /// Sets the code of an account.
    pub fn set_code(&self, address: Address, code: Bytes) {
        self.chain().code.insert(address, code);
    }

    /// Sets the mined transaction count of an account.
    pub fn set_transaction_count(&self, address: Address, count: u64) {
        self.chain().nonces.insert(address, count);
    }

    /// Sets the mined transaction count of an account.
    pub fn transaction_count_of(self, address: Address, count: u64) -> Self {
        self.set_transaction_count(address, count);
        self
    }

    /// Makes gas estimation and calls to `to` (`None` for contract creations) revert with `data`.
    pub fn set_reverting(&self, to: Option<Address>, data: Bytes) {
        self.chain().reverting.insert(to, data);
    }

    /// Makes transactions to `to` pass gas estimation but fail once mined.
    pub fn set_failing_when_mined(&self, to: Option<Address>) {
        self.chain().failing_when_mined.insert(to);
    }

    /// Sets the return data of calls to `to`.
    pub fn set_call_result(&self, to: Address, data: Bytes) {
        self.chain().call_results.insert(to, data);
    }

    /// Adds a log emitted by every transaction to `to` (`None` for contract creations), from the
    /// called or created contract.
    pub fn add_log(&self, to: Option<Address>, topics: Vec<B256>, data: Bytes) {
        self.chain().logs.entry(to).or_default().push((topics, data));
    }

    /// Makes the next submission return `hash`.
    pub fn push_hash(&self, hash: B256) {
        self.chain().next_hashes.push_back(hash);
    }

    /// Makes the next `eth_sendTransaction` accept the transaction but report an error carrying
    /// its hash.
    pub fn fail_next_send_with_hash(&self) {
        self.chain().fail_next_send_with_hash = true;
    }

    /// Raises the base fee to `base_fee` right before the next `eth_sendTransaction` is checked,
    /// as if a block landed between fee estimation and submission.
    pub fn raise_base_fee_on_next_send(&self, base_fee: u128) {
        self.chain().base_fee_on_next_send = Some(base_fee);
    }

    /// Mines one block with every executable mempool transaction, returning its number.
    pub fn mine(&self) -> u64 {
        self.chain().mine()
    }

    /// Mines `count` blocks.
    pub fn mine_blocks(&self, count: u64) -> u64 {
        let mut chain = self.chain();
        for _ in 0..count {
            chain.mine();
        }
        chain.block_number
    }

    /// Removes a transaction from the mempool, returning whether it was there.
    pub fn drop_pending(&self, hash: B256) -> bool {
        let mut chain = self.chain();
        let key = chain.mempool.iter().find(|(_, tx)| tx.hash == hash).map(|(key, _)| *key);
        key.is_some_and(|key| chain.mempool.remove(&key).is_some())
    }

    /// Removes every transaction from the mempool.
    pub fn drop_all_pending(&self) {
        self.chain().mempool.clear();
    }

    /// Submits a transaction from `from` at its next pending nonce, as a wallet outside the engine
    /// would.
    pub fn send_external(&self, from: Address) -> B256 {
        let mut chain = self.chain();
        let nonce = chain.pending_count(from);
        let hash = chain.next_hash(from, nonce);
        let gas_price = chain.gas_price;
        chain.mempool.insert(
            (from, nonce),
            MockTransaction {
                hash,
                from,
                to: Some(Address::repeat_byte(0xee)),
                nonce,
                data: Bytes::new(),
                value: U256::ZERO,
                fees: NetworkFees::Legacy { gas_price },
            },
        );
        if chain.automine {
            chain.mine();
        }
        hash
    }

    /// Returns the transactions the engine submitted with `eth_sendTransaction`, in order.
    pub fn sent_transactions(&self) -> Vec<MockTransaction> {
        self.chain().sent.clone()
    }

    /// Returns how often `method` was requested.
    pub fn request_count(&self, method: &str) -> usize {
        self.chain().requests.get(method).copied().unwrap_or_default()
    }

    /// Returns the current block number.
    pub fn block_number(&self) -> u64 {
        self.chain().block_number
    }

    /// Returns whether a transaction is in the mempool.
    pub fn is_pending(&self, hash: B256) -> bool {
        self.chain().mempool.values().any(|tx| tx.hash == hash)
    }
}

impl MockChain {
    fn count(&mut self, method: &'static str) {
        *self.requests.entry(method).or_default() += 1;
    }

    fn latest_count(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    fn pending_count(&self, address: Address) -> u64 {
        self.mempool
            .keys()
            .filter(|(from, _)| *from == address)
            .map(|(_, nonce)| nonce + 1)
            .fold(self.latest_count(address), u64::max)
    }

    fn next_hash(&mut self, from: Address, nonce: u64) -> B256 {
        if let Some(hash) = self.next_hashes.pop_front() {
            return hash;
        }
        self.hash_counter += 1;
        let mut preimage = from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&self.hash_counter.to_be_bytes());
        keccak256(preimage)
    }

    fn block_hash(number: u64) -> B256 {
        keccak256(number.to_be_bytes())
    }

    fn submit(&mut self, tx: MockTransaction) -> Result<()> {
        let method = "eth_sendTransaction";
        if tx.nonce < self.latest_count(tx.from) {
            return Err(rpc_error(method, "nonce too low"));
        }
        if let Some(existing) = self.mempool.get(&(tx.from, tx.nonce)) {
            if !is_replacement(&existing.fees, &tx.fees) {
                return Err(rpc_error(method, "replacement transaction underpriced"));
            }
        }
        self.mempool.insert((tx.from, tx.nonce), tx);
        if self.automine {
            self.mine();
        }
        Ok(())
    }

    fn mine(&mut self) -> u64 {
        self.block_number += 1;
        let block_number = self.block_number;
        let block_hash = Self::block_hash(block_number);

        loop {
            let executable = self
                .mempool
                .keys()
                .find(|(from, nonce)| *nonce == self.latest_count(*from))
                .copied();
            let Some(key) = executable else { break };
            let Some(tx) = self.mempool.remove(&key) else { break };

            let (status, contract_address) = self.execute(&tx);
            let emitter = tx.to.or(contract_address);
            let logs = match (status, emitter) {
                (ReceiptStatus::Success, Some(emitter)) => self
                    .logs
                    .get(&tx.to)
                    .into_iter()
                    .flatten()
                    .enumerate()
                    .map(|(index, (topics, data))| Log {
                        address: emitter,
                        log_index: index as u64,
                        data: data.clone(),
                        topics: topics.clone(),
                    })
                    .collect(),
                _ => Vec::new(),
            };
            self.nonces.insert(tx.from, tx.nonce + 1);
            let receipt = TransactionReceipt {
                block_hash,
                block_number,
                status,
                contract_address: if status == ReceiptStatus::Success && tx.to.is_none() {
                    contract_address
                } else {
                    None
                },
                logs,
            };
            self.mined.insert(tx.hash, (tx, receipt));
        }
        block_number
    }

    fn execute(&mut self, tx: &MockTransaction) -> (ReceiptStatus, Option<Address>) {
        if self.failing_when_mined.contains(&tx.to) || self.reverting.contains_key(&tx.to) {
            return (ReceiptStatus::Failure, None);
        }
        match tx.to {
            None => {
                let address = tx.from.create(tx.nonce);
                self.code.insert(address, tx.data.clone());
                (ReceiptStatus::Success, Some(address))
            }
            Some(CREATE2_FACTORY_ADDRESS) if self.code.contains_key(&CREATE2_FACTORY_ADDRESS) => {
                if tx.data.len() < 32 {
                    return (ReceiptStatus::Failure, None);
                }
                let salt = B256::from_slice(&tx.data[..32]);
                let init_code = &tx.data[32..];
                let address = CREATE2_FACTORY_ADDRESS.create2(salt, keccak256(init_code));
                if self.code.contains_key(&address) {
                    return (ReceiptStatus::Failure, None);
                }
                self.code.insert(address, Bytes::copy_from_slice(init_code));
                (ReceiptStatus::Success, Some(address))
            }
            Some(_) => (ReceiptStatus::Success, None),
        }
    }

    fn fetched(tx: &MockTransaction, block_number: Option<u64>) -> FetchedTransaction {
        FetchedTransaction { hash: tx.hash, nonce: tx.nonce, block_number, fees: tx.fees }
    }
}

fn rpc_error(method: &'static str, message: &str) -> LedgerError {
    LedgerError::Rpc { method, code: -32000, message: message.to_string(), tx_hash: None }
}

/// Whether `new` pays at least 10% more than `old` on every fee component.
fn is_replacement(old: &NetworkFees, new: &NetworkFees) -> bool {
    let bumped = |old: u128, new: u128| new >= old.saturating_mul(110) / 100;
    match (old, new) {
        (
            NetworkFees::Eip1559 {
                max_fee_per_gas: old_max,
                max_priority_fee_per_gas: old_priority,
            },
            NetworkFees::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas },
        ) => bumped(*old_max, *max_fee_per_gas) && bumped(*old_priority, *max_priority_fee_per_gas),
        (NetworkFees::Legacy { gas_price: old_price }, NetworkFees::Legacy { gas_price }) => {
            bumped(*old_price, *gas_price)
        }
        _ => false,
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn chain_id(&self) -> Result<u64> {
        let mut chain = self.chain();
        chain.count("eth_chainId");
        Ok(chain.chain_id)
    }

    async fn latest_block(&self) -> Result<Block> {
        let mut chain = self.chain();
        chain.count("eth_getBlockByNumber");
        Ok(Block {
            hash: MockChain::block_hash(chain.block_number),
            number: chain.block_number,
            base_fee_per_gas: chain.base_fee,
        })
    }

    async fn balance(&self, address: Address, _block: BlockTag) -> Result<U256> {
        let mut chain = self.chain();
        chain.count("eth_getBalance");
        Ok(chain.balances.get(&address).copied().unwrap_or_default())
    }

    async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        let mut chain = self.chain();
        chain.count("hardhat_setBalance");
        chain.balances.insert(address, balance);
        Ok(())
    }

    async fn gas_price(&self) -> Result<u128> {
        let mut chain = self.chain();
        chain.count("eth_gasPrice");
        Ok(chain.gas_price)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        let mut chain = self.chain();
        chain.count("eth_estimateGas");
        if let Some(data) = chain.reverting.get(&request.to) {
            return Err(LedgerError::Call(CallFailure {
                message: "execution reverted".to_string(),
                data: Some(data.clone()),
                tx_hash: None,
                custom_error_reported: false,
            }));
        }
        Ok(21_000 + 16 * request.data.len() as u64)
    }

    async fn call(
        &self,
        request: &TransactionRequest,
        _block: BlockTag,
    ) -> Result<RawStaticCallResult> {
        let mut chain = self.chain();
        chain.count("eth_call");
        if let Some(data) = chain.reverting.get(&request.to) {
            return Ok(RawStaticCallResult::revert(data.clone()));
        }
        let result =
            request.to.and_then(|to| chain.call_results.get(&to).cloned()).unwrap_or_default();
        Ok(RawStaticCallResult::success(result))
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<B256> {
        let mut chain = self.chain();
        chain.count("eth_sendTransaction");
        if let Some(base_fee) = chain.base_fee_on_next_send.take() {
            chain.base_fee = Some(base_fee);
        }
        if let (Some(NetworkFees::Eip1559 { max_fee_per_gas, .. }), Some(base_fee)) =
            (request.fees, chain.base_fee)
        {
            if max_fee_per_gas < base_fee {
                return Err(LedgerError::FeeTooLow {
                    method: "eth_sendTransaction",
                    message: format!(
                        "max fee per gas less than block base fee: {max_fee_per_gas} < {base_fee}"
                    ),
                });
            }
        }
        let nonce = request.nonce.unwrap_or_else(|| chain.pending_count(request.from));
        let hash = chain.next_hash(request.from, nonce);
        let gas_price = chain.gas_price;
        let tx = MockTransaction {
            hash,
            from: request.from,
            to: request.to,
            nonce,
            data: request.data.clone(),
            value: request.value,
            fees: request.fees.unwrap_or(NetworkFees::Legacy { gas_price }),
        };
        chain.submit(tx.clone())?;
        chain.sent.push(tx);
        if std::mem::take(&mut chain.fail_next_send_with_hash) {
            return Err(LedgerError::Rpc {
                method: "eth_sendTransaction",
                code: -32603,
                message: "transaction submitted but the node timed out".to_string(),
                tx_hash: Some(hash),
            });
        }
        Ok(hash)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        let method = "eth_sendRawTransaction";
        let mut chain = self.chain();
        chain.count(method);
        let deployment =
            PresignedDeployment::decode(raw).map_err(|err| rpc_error(method, &err.to_string()))?;
        let balance = chain.balances.get(&deployment.signer).copied().unwrap_or_default();
        if balance < deployment.required_funds() {
            return Err(rpc_error(method, "insufficient funds for gas * price + value"));
        }
        let hash = keccak256(raw);
        chain.submit(MockTransaction {
            hash,
            from: deployment.signer,
            to: None,
            nonce: deployment.nonce,
            data: deployment.init_code,
            value: deployment.value,
            fees: NetworkFees::Legacy { gas_price: deployment.gas_price },
        })?;
        Ok(hash)
    }

    async fn transaction_count(&self, address: Address, block: BlockTag) -> Result<u64> {
        let mut chain = self.chain();
        chain.count("eth_getTransactionCount");
        Ok(match block {
            BlockTag::Pending => chain.pending_count(address),
            BlockTag::Latest | BlockTag::Number(_) => chain.latest_count(address),
        })
    }

    async fn transaction(&self, hash: B256) -> Result<Option<FetchedTransaction>> {
        let mut chain = self.chain();
        chain.count("eth_getTransactionByHash");
        if let Some((tx, receipt)) = chain.mined.get(&hash) {
            return Ok(Some(MockChain::fetched(tx, Some(receipt.block_number))));
        }
        Ok(chain.mempool.values().find(|tx| tx.hash == hash).map(|tx| MockChain::fetched(tx, None)))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let mut chain = self.chain();
        chain.count("eth_getTransactionReceipt");
        Ok(chain.mined.get(&hash).map(|(_, receipt)| receipt.clone()))
    }

    async fn code(&self, address: Address, _block: BlockTag) -> Result<Bytes> {
        let mut chain = self.chain();
        chain.count("eth_getCode");
        Ok(chain.code.get(&address).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DEPLOYER;

    fn request(nonce: u64, gas_price: u128) -> TransactionRequest {
        TransactionRequest {
            from: DEPLOYER,
            to: Some(Address::repeat_byte(1)),
            nonce: Some(nonce),
            fees: Some(NetworkFees::Legacy { gas_price }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replace_by_fee() {
        let ledger = MockLedger::default().manual_mining();
        let first = ledger.send_transaction(&request(0, 100)).await.unwrap();
        assert_eq!(ledger.transaction_count(DEPLOYER, BlockTag::Pending).await.unwrap(), 1);
        assert_eq!(ledger.transaction_count(DEPLOYER, BlockTag::Latest).await.unwrap(), 0);

        let underpriced = ledger.send_transaction(&request(0, 105)).await;
        assert!(matches!(underpriced, Err(LedgerError::Rpc { .. })));

        let second = ledger.send_transaction(&request(0, 110)).await.unwrap();
        assert!(!ledger.is_pending(first));
        ledger.mine();
        assert!(ledger.transaction_receipt(first).await.unwrap().is_none());
        assert!(ledger.transaction_receipt(second).await.unwrap().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_nonce_gap_waits() {
        let ledger = MockLedger::default().manual_mining();
        let later = ledger.send_transaction(&request(1, 100)).await.unwrap();
        ledger.mine();
        assert!(ledger.transaction_receipt(later).await.unwrap().is_none());

        ledger.send_transaction(&request(0, 100)).await.unwrap();
        ledger.mine();
        assert!(ledger.transaction_receipt(later).await.unwrap().is_some());
        assert_eq!(ledger.transaction_count(DEPLOYER, BlockTag::Latest).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_contract_creation_receipt() {
        let ledger = MockLedger::default();
        let request = TransactionRequest {
            from: DEPLOYER,
            data: Bytes::from_static(&[0x60]),
            ..Default::default()
        };
        let hash = ledger.send_transaction(&request).await.unwrap();
        let receipt = ledger.transaction_receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.contract_address, Some(DEPLOYER.create(0)));
        assert!(!ledger.code(DEPLOYER.create(0), BlockTag::Latest).await.unwrap().is_empty());
    }
}
