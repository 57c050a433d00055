//! Sealed-box encryption of partial sums.
//!
//! When a coordinator public key is configured, a participant serializes its
//! partial sum to JSON, splits the bytes into fixed-size chunks and seals
//! each chunk to the coordinator's public key. The coordinator opens every
//! chunk, joins the plaintexts and parses the update back. Any chunk that
//! fails to open makes the whole update undecryptable: a partial sum is
//! never silently replaced by zeros.

use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::{box_, sealedbox};
use thiserror::Error;

use crate::model::ModelUpdate;

pub use sodiumoxide::crypto::box_::{PublicKey, SecretKey};

/// Number of plaintext bytes sealed into one chunk.
const CHUNK_SIZE: usize = 4096;

/// A key pair for opening sealed update chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptKeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl EncryptKeyPair {
    /// Generates a fresh key pair.
    pub fn generate() -> Self {
        let (public, secret) = box_::gen_keypair();
        EncryptKeyPair { public, secret }
    }
}

/// One sealed chunk of an encrypted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedChunk(Vec<u8>);

/// Errors returned by the encrypted-update transform.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// failed to serialize the update for encryption
    #[error("failed to serialize the update for encryption: {0}")]
    Serialize(#[source] serde_json::Error),
    /// chunk could not be opened
    #[error("chunk {0} could not be opened with the configured key pair")]
    ChunkDecryption(usize),
    /// the decrypted bytes are not a valid update
    #[error("the decrypted bytes are not a valid update: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Seals `update` to `public_key`, yielding the chunk sequence carried by an
/// encrypted update message.
pub fn encrypt_update(
    public_key: &PublicKey,
    update: &ModelUpdate,
) -> Result<Vec<EncryptedChunk>, CryptoError> {
    let plaintext = serde_json::to_vec(update).map_err(CryptoError::Serialize)?;
    Ok(plaintext
        .chunks(CHUNK_SIZE)
        .map(|chunk| EncryptedChunk(sealedbox::seal(chunk, public_key)))
        .collect())
}

/// Opens every chunk with the coordinator key pair and parses the update.
pub fn decrypt_update(
    keys: &EncryptKeyPair,
    chunks: &[EncryptedChunk],
) -> Result<ModelUpdate, CryptoError> {
    let mut plaintext = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let opened = sealedbox::open(&chunk.0, &keys.public, &keys.secret)
            .map_err(|()| CryptoError::ChunkDecryption(index))?;
        plaintext.extend_from_slice(&opened);
    }
    serde_json::from_slice(&plaintext).map_err(CryptoError::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayerUpdate, Tensor};

    fn update(len: usize) -> ModelUpdate {
        let mut update = ModelUpdate::new();
        update.insert(
            "dense",
            LayerUpdate {
                weights: (0..len).map(|i| i as f64 / 3.0).collect(),
                bias: Tensor::from(vec![-1.0]),
            },
        );
        update
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let original = update(8);
        let chunks = encrypt_update(&keys.public, &original).unwrap();
        assert_eq!(decrypt_update(&keys, &chunks).unwrap(), original);
    }

    #[test]
    fn test_large_updates_span_multiple_chunks() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let original = update(2048);
        let chunks = encrypt_update(&keys.public, &original).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(decrypt_update(&keys, &chunks).unwrap(), original);
    }

    #[test]
    fn test_wrong_key_is_a_hard_failure() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let other = EncryptKeyPair::generate();
        let chunks = encrypt_update(&keys.public, &update(8)).unwrap();
        match decrypt_update(&other, &chunks) {
            Err(CryptoError::ChunkDecryption(0)) => (),
            result => panic!("expected a chunk decryption error, got {:?}", result),
        }
    }

    #[test]
    fn test_tampered_chunk_is_a_hard_failure() {
        sodiumoxide::init().unwrap();
        let keys = EncryptKeyPair::generate();
        let mut chunks = encrypt_update(&keys.public, &update(2048)).unwrap();
        let last = chunks.len() - 1;
        chunks[last].0[0] ^= 0xff;
        match decrypt_update(&keys, &chunks) {
            Err(CryptoError::ChunkDecryption(index)) => assert_eq!(index, last),
            result => panic!("expected a chunk decryption error, got {:?}", result),
        }
    }
}
