//! Bootstrapping of contracts a strategy relies on.
//!
//! The CREATE2 factory is deployed with Nick's method: a contract creation transaction signed
//! without chain id by a key nobody holds. Anyone can fund the recovered signer and broadcast the
//! transaction, and the contract lands at `signer.create(0)` on every chain.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, Header};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tracing::{debug, info};

use super::{BootstrapError, PresignedTxError};
use crate::{
    ledger::{BlockTag, LedgerClient},
    ExecutionConfig,
};

/// A contract that must exist before a strategy can run, with the pre-signed transaction that
/// deploys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryPrerequisite {
    /// Where the contract is expected.
    pub address: Address,
    /// Raw pre-signed deployment transaction.
    pub deployment_tx: &'static [u8],
}

/// A decoded pre-EIP-155 contract creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedDeployment {
    /// The raw transaction.
    pub raw: Bytes,
    /// Nonce.
    pub nonce: u64,
    /// Gas price.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Value sent to the constructor.
    pub value: U256,
    /// Init code.
    pub init_code: Bytes,
    /// Recovered signer.
    pub signer: Address,
}

impl PresignedDeployment {
    /// Decodes `raw` and recovers its signer.
    pub fn decode(raw: &[u8]) -> Result<Self, PresignedTxError> {
        let mut buf = raw;
        let header = Header::decode(&mut buf).map_err(|_| PresignedTxError::MalformedEncoding)?;
        if !header.list {
            return Err(PresignedTxError::MalformedEncoding);
        }

        let nonce = decode_field::<u64>(&mut buf)?;
        let gas_price = decode_field::<u128>(&mut buf)?;
        let gas_limit = decode_field::<u64>(&mut buf)?;
        let to = Header::decode(&mut buf).map_err(|_| PresignedTxError::MalformedEncoding)?;
        if to.list || to.payload_length != 0 {
            return Err(PresignedTxError::NotContractCreation);
        }
        let value = decode_field::<U256>(&mut buf)?;
        let init_code = decode_field::<Bytes>(&mut buf)?;
        let v = decode_field::<u64>(&mut buf)?;
        let r = decode_field::<U256>(&mut buf)?;
        let s = decode_field::<U256>(&mut buf)?;
        if v != 27 && v != 28 {
            return Err(PresignedTxError::NotPreEip155);
        }

        let signing_hash = keccak256(unsigned_rlp(nonce, gas_price, gas_limit, value, &init_code));
        let signer = recover(signing_hash, (v - 27) as u8, r, s)?;
        Ok(Self {
            raw: Bytes::copy_from_slice(raw),
            nonce,
            gas_price,
            gas_limit,
            value,
            init_code,
            signer,
        })
    }

    /// Returns the address the transaction deploys to.
    pub fn deployed_address(&self) -> Address {
        self.signer.create(self.nonce)
    }

    /// Returns the balance the signer needs to pay for the transaction.
    pub fn required_funds(&self) -> U256 {
        U256::from(self.gas_price) * U256::from(self.gas_limit) + self.value
    }
}

fn decode_field<T: Decodable>(buf: &mut &[u8]) -> Result<T, PresignedTxError> {
    T::decode(buf).map_err(|_| PresignedTxError::MalformedEncoding)
}

/// Encodes `[nonce, gasPrice, gasLimit, "", value, data]`, the payload a pre-EIP-155 creation is
/// signed over.
fn unsigned_rlp(
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    value: U256,
    data: &Bytes,
) -> Vec<u8> {
    let payload_length = nonce.length()
        + gas_price.length()
        + gas_limit.length()
        + 1
        + value.length()
        + data.length();
    let mut out = Vec::with_capacity(payload_length + 4);
    Header { list: true, payload_length }.encode(&mut out);
    nonce.encode(&mut out);
    gas_price.encode(&mut out);
    gas_limit.encode(&mut out);
    // empty recipient
    out.push(alloy_rlp::EMPTY_STRING_CODE);
    value.encode(&mut out);
    data.encode(&mut out);
    out
}

fn recover(hash: B256, recovery_id: u8, r: U256, s: U256) -> Result<Address, PresignedTxError> {
    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(&r.to_be_bytes::<32>());
    signature[32..].copy_from_slice(&s.to_be_bytes::<32>());

    let recovery_id =
        RecoveryId::try_from(recovery_id).map_err(|_| PresignedTxError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&signature).map_err(|_| PresignedTxError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
        .map_err(|_| PresignedTxError::InvalidSignature)?;

    // uncompressed SEC1 point: 0x04 ‖ x ‖ y
    let point = key.to_encoded_point(false);
    Ok(Address::from_slice(&keccak256(&point.as_bytes()[1..])[12..]))
}

/// What [`ensure_factory`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The contract already had code.
    AlreadyDeployed,
    /// The contract was deployed by the given transaction.
    Deployed(B256),
}

/// Makes sure the contract of `prerequisite` exists, deploying it when the configured policy
/// allows it on this chain.
pub async fn ensure_factory(
    ledger: &dyn LedgerClient,
    prerequisite: &FactoryPrerequisite,
    config: &ExecutionConfig,
    chain_id: u64,
) -> Result<BootstrapOutcome, BootstrapError> {
    let address = prerequisite.address;
    if !ledger.code(address, BlockTag::Latest).await?.is_empty() {
        debug!(%address, "Factory already deployed");
        return Ok(BootstrapOutcome::AlreadyDeployed);
    }
    if !config.factory_bootstrap.allows(chain_id) {
        return Err(BootstrapError::FactoryMissing { address, chain_id });
    }

    let deployment = PresignedDeployment::decode(prerequisite.deployment_tx)?;
    let actual = deployment.deployed_address();
    if actual != address {
        return Err(BootstrapError::AddressMismatch { expected: address, actual });
    }

    let required = deployment.required_funds();
    let balance = ledger.balance(deployment.signer, BlockTag::Latest).await?;
    if balance < required {
        debug!(signer = %deployment.signer, %balance, %required, "Funding factory deployer");
        ledger.set_balance(deployment.signer, required).await?;
    }

    let hash = ledger.send_raw_transaction(&deployment.raw).await?;
    info!(%address, %hash, chain_id, "Bootstrapping factory");

    let polls = config.transaction_lookup_retries.max(1);
    for poll in 1..=polls {
        if let Some(receipt) = ledger.transaction_receipt(hash).await? {
            debug!(%hash, block = receipt.block_number, "Factory deployment mined");
            if ledger.code(address, BlockTag::Latest).await?.is_empty() {
                return Err(BootstrapError::NoCode { hash, address });
            }
            return Ok(BootstrapOutcome::Deployed(hash));
        }
        if poll < polls {
            tokio::time::sleep(config.block_polling_interval).await;
        }
    }
    Err(BootstrapError::NotMined { hash, polls })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, hex};

    use super::*;
    use crate::constants::{
        CREATE2_FACTORY_ADDRESS, CREATE2_FACTORY_DEPLOYER, CREATE2_FACTORY_DEPLOYMENT_TX,
    };

    /// Legacy transaction signed with chain id 1 (`v = 38`).
    const REPLAY_PROTECTED_TX: &[u8] = &hex!(
        "f856808504a817c800830186a0808085608060405226a0fceb37453e90ac5ec2780748b7a4907b1d"
        "cfb87708697de2e6be19831938c77ba0224ee4c1aaa6a1490b4e3a1fbed7c5151668a12b6f6e3227"
        "c2692a64cf79e81f"
    );

    #[test]
    fn test_decode_factory_deployment() {
        let tx = PresignedDeployment::decode(CREATE2_FACTORY_DEPLOYMENT_TX).unwrap();
        assert_eq!(tx.nonce, 0);
        assert_eq!(tx.gas_price, 100_000_000_000);
        assert_eq!(tx.gas_limit, 100_000);
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.init_code.len(), 83);
        assert_eq!(tx.signer, CREATE2_FACTORY_DEPLOYER);
        assert_eq!(tx.deployed_address(), CREATE2_FACTORY_ADDRESS);
        assert_eq!(tx.required_funds(), U256::from(10_000_000_000_000_000u128));
    }

    #[test]
    fn test_rejects_replay_protected_tx() {
        assert_eq!(
            PresignedDeployment::decode(REPLAY_PROTECTED_TX),
            Err(PresignedTxError::NotPreEip155)
        );
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(PresignedDeployment::decode(&[]), Err(PresignedTxError::MalformedEncoding));
        assert_eq!(
            PresignedDeployment::decode(&CREATE2_FACTORY_DEPLOYMENT_TX[..40]),
            Err(PresignedTxError::MalformedEncoding)
        );
        // a single string instead of a list
        assert_eq!(
            PresignedDeployment::decode(&[0x83, 1, 2, 3]),
            Err(PresignedTxError::MalformedEncoding)
        );
    }

    #[test]
    fn test_deployer_address_is_nonce_zero_create() {
        let signer = address!("3fab184622dc19b6109349b94811493bf2a45362");
        assert_eq!(signer.create(0), CREATE2_FACTORY_ADDRESS);
    }
}
