//! Block-cipher capability and the ECB glue used for the encrypted entity
//! dump.
//!
//! Every block is encrypted independently with no IV and no chaining, so
//! equal plaintext blocks give equal ciphertext blocks. The engine reads
//! `.ctx` files that way; nothing here provides integrity.

use crate::reader::{BulwarkError, Result};
use tracing::trace;

/// Key material for the encrypted entity dump.
pub const ENTITY_KEY: [u8; 8] = *b"A5fSXbf7";

/// A keyed block cipher. Key scheduling happens when the value is built.
pub trait BlockCipher {
    fn block_size(&self) -> usize;

    /// Encrypts one block in place. `block.len()` equals `block_size()`.
    fn encrypt_block(&self, block: &mut [u8]);

    /// Decrypts one block in place. `block.len()` equals `block_size()`.
    fn decrypt_block(&self, block: &mut [u8]);
}

/// Copies `data` and right-pads it with nulls to a multiple of `block_size`.
pub fn pad_to_block(data: &[u8], block_size: usize) -> Vec<u8> {
    let padded_len = data.len().div_ceil(block_size) * block_size;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.resize(padded_len, 0);
    padded
}

pub fn encrypt_ecb<C: BlockCipher + ?Sized>(cipher: &C, plaintext: &[u8]) -> Vec<u8> {
    let block_size = cipher.block_size();
    let mut buffer = pad_to_block(plaintext, block_size);
    trace!(
        plaintext = plaintext.len(),
        blocks = buffer.len() / block_size,
        "encrypting"
    );

    for block in buffer.chunks_exact_mut(block_size) {
        cipher.encrypt_block(block);
    }
    buffer
}

/// Inverse of [`encrypt_ecb`]. The null padding is kept.
pub fn decrypt_ecb<C: BlockCipher + ?Sized>(cipher: &C, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let block_size = cipher.block_size();
    if ciphertext.len() % block_size != 0 {
        return Err(BulwarkError::UnalignedCiphertext {
            len: ciphertext.len(),
            block_size,
        });
    }

    let mut buffer = ciphertext.to_vec();
    for block in buffer.chunks_exact_mut(block_size) {
        cipher.decrypt_block(block);
    }
    Ok(buffer)
}
