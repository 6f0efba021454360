//! BLAKE3 hashing and key stretching.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// BLAKE3 digest.
pub type HashOutput = [u8; 32];

/// Hash `data` with BLAKE3.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// Hash the concatenation of several slices without allocating.
#[must_use]
pub fn hash_concat(parts: &[&[u8]]) -> HashOutput {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// HKDF-Extract with keyed BLAKE3 in place of HMAC.
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    if salt.is_empty() {
        hash(ikm)
    } else {
        let mut hasher = blake3::Hasher::new_keyed(&hash(salt));
        hasher.update(ikm);
        *hasher.finalize().as_bytes()
    }
}

/// HKDF-Expand with the BLAKE3 XOF.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], output: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_keyed(prk);
    hasher.update(info);
    hasher.finalize_xof().fill(output);
}

/// Extract-then-expand.
pub fn hkdf(salt: &[u8], ikm: &[u8], info: &[u8], output: &mut [u8]) {
    let mut prk = hkdf_extract(salt, ikm);
    hkdf_expand(&prk, info, output);
    prk.zeroize();
}

/// Key material for one direction of a secure channel.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DirectionKeys {
    /// AEAD key
    pub cipher_key: [u8; 32],
    /// Salt mixed into every nonce
    pub nonce_salt: [u8; 16],
}

/// Stretch a shared secret into two independent sets of direction keys.
///
/// Both peers compute the same pair; the handshake ordering decides which set each side
/// uses for sending.
#[must_use]
pub fn stretch_keys(shared_secret: &[u8], salt: &[u8]) -> (DirectionKeys, DirectionKeys) {
    let mut okm = [0u8; 96];
    hkdf(salt, shared_secret, b"strand secure channel key expansion", &mut okm);

    let mut first = DirectionKeys {
        cipher_key: [0u8; 32],
        nonce_salt: [0u8; 16],
    };
    let mut second = first.clone();
    first.cipher_key.copy_from_slice(&okm[0..32]);
    first.nonce_salt.copy_from_slice(&okm[32..48]);
    second.cipher_key.copy_from_slice(&okm[48..80]);
    second.nonce_salt.copy_from_slice(&okm[80..96]);
    okm.zeroize();

    (first, second)
}
