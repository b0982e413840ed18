//! The key/signing collaborator.
//!
//! [`LocalKeySigner`] signs EIP-155 legacy contract-creation transactions with a
//! secp256k1 key held in memory.

use std::str::FromStr;

use alloy_core::{
    primitives::{Address, Bytes, U256, keccak256},
    rlp::{Encodable, Header},
};
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::{Context, Result};
use k256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};

use crate::network::{SignedTransaction, UnsignedTransaction};

/// Turns unsigned transaction payloads into signed, encoded transactions.
pub trait TransactionSigner: Send + Sync {
    /// The account transactions are sent from.
    fn address(&self) -> Address;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction>;
}

/// A signer backed by a private key in memory.
#[derive(Clone)]
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalKeySigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(&key);
        Self { key, address }
    }

    /// Build a signer from a hex encoded private key (with or without `0x`).
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .context("Failed to parse private key")?;
        Ok(Self::new(signer.credential().clone()))
    }

    /// Derive a signer from a BIP-39 mnemonic at `m/44'/60'/0'/0/{index}`.
    pub fn from_mnemonic(phrase: &str, index: u32) -> Result<Self> {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(index)
            .context("Invalid derivation index")?
            .build()
            .context("Failed to derive key from mnemonic")?;
        Ok(Self::new(signer.credential().clone()))
    }
}

impl TransactionSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        let empty_to = Bytes::new();
        let zero_value = U256::ZERO;

        let signing_payload = encode_list(&[
            &tx.nonce,
            &tx.gas_price,
            &tx.gas_limit,
            &empty_to,
            &zero_value,
            &tx.data,
            &tx.chain_id,
            &0u8,
            &0u8,
        ]);
        let signing_hash = keccak256(&signing_payload);

        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(signing_hash.as_slice())
            .context("Failed to sign transaction hash")?;

        let v = recovery_id.to_byte() as u64 + 35 + tx.chain_id * 2;
        let signature_bytes = signature.to_bytes();
        let r = U256::from_be_slice(&signature_bytes[..32]);
        let s = U256::from_be_slice(&signature_bytes[32..]);

        let raw = encode_list(&[
            &tx.nonce,
            &tx.gas_price,
            &tx.gas_limit,
            &empty_to,
            &zero_value,
            &tx.data,
            &v,
            &r,
            &s,
        ]);

        Ok(SignedTransaction {
            from: self.address,
            nonce: tx.nonce,
            hash: keccak256(&raw),
            raw: Bytes::from(raw),
        })
    }
}

/// RLP-encode a list of fields.
fn encode_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length = fields.iter().map(|field| field.length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}

/// Ethereum address of a secp256k1 key: last 20 bytes of the keccak hash of the
/// uncompressed public key.
fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}
