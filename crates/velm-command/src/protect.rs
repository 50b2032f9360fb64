//! Payload protection for static-command tokens.
//!
//! Encrypt-then-MAC over SHA-256 with a plaintext-derived nonce: equal
//! payloads under the same key produce equal tokens, which keeps plan
//! serialization deterministic end to end. Unprotecting a tampered or
//! malformed payload yields one opaque error; callers cannot distinguish a
//! wrong key from a mangled token.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("the protected payload could not be decrypted")]
pub struct ProtectionError;

/// Protects opaque byte payloads for round-trips through the client.
/// `purpose` binds a token to its use site so a token minted for one
/// purpose cannot be replayed for another.
pub trait ViewModelProtector: Send + Sync {
    fn protect(&self, data: &[u8], purpose: &[&str]) -> Vec<u8>;
    fn unprotect(&self, data: &[u8], purpose: &[&str]) -> Result<Vec<u8>, ProtectionError>;
}

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

pub struct KeyedHashProtector {
    key: [u8; 32],
}

impl KeyedHashProtector {
    pub fn new(key: [u8; 32]) -> Self {
        KeyedHashProtector { key }
    }

    fn keystream_block(&self, nonce: &[u8], counter: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(b"enc");
        hasher.update(nonce);
        hasher.update(counter.to_be_bytes());
        hasher.finalize().into()
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) {
        for (i, chunk) in data.chunks_mut(32).enumerate() {
            let block = self.keystream_block(nonce, i as u64);
            for (byte, key_byte) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key_byte;
            }
        }
    }

    fn tag(&self, nonce: &[u8], purpose: &[&str], ciphertext: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(b"mac");
        for p in purpose {
            hasher.update((p.len() as u64).to_be_bytes());
            hasher.update(p.as_bytes());
        }
        hasher.update(nonce);
        hasher.update(ciphertext);
        hasher.finalize().into()
    }

    fn nonce(&self, purpose: &[&str], plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(b"siv");
        hasher.update(self.key);
        for p in purpose {
            hasher.update((p.len() as u64).to_be_bytes());
            hasher.update(p.as_bytes());
        }
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut nonce = [0_u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }
}

impl ViewModelProtector for KeyedHashProtector {
    fn protect(&self, data: &[u8], purpose: &[&str]) -> Vec<u8> {
        let nonce = self.nonce(purpose, data);
        let mut ciphertext = data.to_vec();
        self.apply_keystream(&nonce, &mut ciphertext);
        let tag = self.tag(&nonce, purpose, &ciphertext);

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        token.extend_from_slice(&tag);
        token
    }

    fn unprotect(&self, data: &[u8], purpose: &[&str]) -> Result<Vec<u8>, ProtectionError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtectionError);
        }
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let expected = self.tag(nonce, purpose, ciphertext);
        if !constant_time_eq(tag, &expected) {
            return Err(ProtectionError);
        }

        let mut plaintext = ciphertext.to_vec();
        self.apply_keystream(nonce, &mut plaintext);
        Ok(plaintext)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut difference = 0_u8;
    for (x, y) in a.iter().zip(b.iter()) {
        difference |= x ^ y;
    }
    difference == 0
}
