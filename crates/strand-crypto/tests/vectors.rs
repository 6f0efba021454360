//! Cryptographic test vectors from official specifications.
//!
//! This module contains test vectors from:
//! - RFC 7748 (X25519)
//! - RFC 8032 (Ed25519)
//! - BLAKE3 official test vectors
//!
//! These vectors ensure our implementations match the specifications exactly.

use strand_crypto::aead::{AeadKey, FrameCipher, Nonce};
use strand_crypto::hash;
use strand_crypto::x25519::{EphemeralPublic, EphemeralSecret};
use strand_crypto::{CryptoError, PrivateKey, PublicKey, Signature};

fn decode_hex(hex: &str) -> Vec<u8> {
    hex::decode(hex).unwrap()
}

fn array32(hex: &str) -> [u8; 32] {
    decode_hex(hex).try_into().unwrap()
}

// ============================================================================
// RFC 7748 Test Vectors (X25519)
// ============================================================================

#[test]
fn test_x25519_rfc7748_vector_1() {
    // RFC 7748 Section 6.1
    let alice = EphemeralSecret::from_bytes(array32(
        "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a",
    ));
    let bob = EphemeralSecret::from_bytes(array32(
        "5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb",
    ));

    assert_eq!(
        alice.public_key().as_bytes().to_vec(),
        decode_hex("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a")
    );
    assert_eq!(
        bob.public_key().as_bytes().to_vec(),
        decode_hex("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f")
    );

    let shared = decode_hex("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");
    let alice_shared = alice.agree(&bob.public_key()).unwrap();
    let bob_shared = bob.agree(&alice.public_key()).unwrap();
    assert_eq!(alice_shared.as_bytes().to_vec(), shared);
    assert_eq!(bob_shared.as_bytes().to_vec(), shared);
}

#[test]
fn test_x25519_scalar_multiplication() {
    // RFC 7748 Section 5.2
    let scalar = EphemeralSecret::from_bytes(array32(
        "a546e36bf0527c9d3b16154b82465edd62144c0ac1fc5a18506a2244ba449ac4",
    ));
    let point = EphemeralPublic::from_slice(&decode_hex(
        "e6db6867583030db3594c1a424b15f7c726624ec26b3353b10a903a6d0ab1c4c",
    ))
    .unwrap();

    let shared = scalar.agree(&point).unwrap();
    assert_eq!(
        shared.as_bytes().to_vec(),
        decode_hex("c3da55379de9c6908e94ea4df28d084f32eccf03491c71f754b4075577a28552")
    );
}

#[test]
fn test_x25519_low_order_rejection() {
    let secret = EphemeralSecret::generate(&mut rand_core::OsRng);
    let identity = EphemeralPublic::from_slice(&[0u8; 32]).unwrap();
    assert!(matches!(
        secret.agree(&identity),
        Err(CryptoError::KeyAgreementFailed)
    ));
}

#[test]
fn test_x25519_public_key_length() {
    assert!(EphemeralPublic::from_slice(&[1u8; 31]).is_err());
    assert!(EphemeralPublic::from_slice(&[1u8; 33]).is_err());
}

// ============================================================================
// RFC 8032 Test Vectors (Ed25519)
// ============================================================================

#[test]
fn test_ed25519_rfc8032_test_1() {
    let key = PrivateKey::from_seed(&array32(
        "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60",
    ));
    assert_eq!(
        key.public().raw().to_vec(),
        decode_hex("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
    );

    let expected = decode_hex(
        "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b",
    );
    let sig = key.sign(b"");
    assert_eq!(sig.as_bytes().to_vec(), expected);
    assert!(key.public().verify(b"", &sig).is_ok());
}

#[test]
fn test_ed25519_rejects_modified_message() {
    let key = PrivateKey::from_seed(&[7u8; 32]);
    let sig = key.sign(b"strand");
    assert!(key.public().verify(b"strand", &sig).is_ok());
    assert!(key.public().verify(b"strond", &sig).is_err());

    let mut bytes = *sig.as_bytes();
    bytes[0] ^= 1;
    let forged = Signature::from_slice(&bytes).unwrap();
    assert!(key.public().verify(b"strand", &forged).is_err());
}

#[test]
fn test_key_encoding_roundtrip() {
    let key = PrivateKey::from_seed(&[3u8; 32]);
    let public = key.public();

    let decoded = PublicKey::from_bytes(&public.to_bytes()).unwrap();
    assert_eq!(decoded, public);

    let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
    assert_eq!(restored.public(), public);
}

// ============================================================================
// BLAKE3 Test Vectors
// ============================================================================

#[test]
fn test_blake3_empty() {
    assert_eq!(
        hash::hash(b"").to_vec(),
        decode_hex("af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262")
    );
}

#[test]
fn test_blake3_concat_matches_single_shot() {
    assert_eq!(
        hash::hash_concat(&[b"hello ", b"world"]),
        hash::hash(b"hello world")
    );
}

#[test]
fn test_hkdf_deterministic_and_info_separated() {
    let prk = hash::hkdf_extract(b"salt", b"input key material");

    let mut okm1 = [0u8; 64];
    let mut okm2 = [0u8; 64];
    hash::hkdf_expand(&prk, b"application info", &mut okm1);
    hash::hkdf_expand(&prk, b"application info", &mut okm2);
    assert_eq!(okm1, okm2);

    let mut okm3 = [0u8; 64];
    hash::hkdf_expand(&prk, b"different info", &mut okm3);
    assert_ne!(okm1, okm3);
}

#[test]
fn test_stretch_keys_directions_differ() {
    let (a, b) = hash::stretch_keys(&[0x11; 32], b"salt");
    assert_ne!(a.cipher_key, b.cipher_key);
    assert_ne!(a.nonce_salt, b.nonce_salt);

    let (a2, _) = hash::stretch_keys(&[0x11; 32], b"salt");
    assert_eq!(a.cipher_key, a2.cipher_key);
}

// ============================================================================
// XChaCha20-Poly1305
// ============================================================================

#[test]
fn test_xchacha_roundtrip_and_tamper() {
    let key = AeadKey::new([0x42u8; 32]);
    let nonce = Nonce::from_counter(0, &[0u8; 16]);

    let ciphertext = key.encrypt(&nonce, b"plaintext", b"aad").unwrap();
    assert_eq!(ciphertext.len(), 9 + strand_crypto::aead::TAG_SIZE);
    assert_eq!(key.decrypt(&nonce, &ciphertext, b"aad").unwrap(), b"plaintext");

    let mut tampered = ciphertext.clone();
    tampered[0] ^= 1;
    assert!(key.decrypt(&nonce, &tampered, b"aad").is_err());
    assert!(key.decrypt(&nonce, &ciphertext, b"other").is_err());
}

#[test]
fn test_frame_cipher_requires_order() {
    let (keys, _) = hash::stretch_keys(&[0x22; 32], b"order");
    let mut sealer = FrameCipher::new(&keys);
    let mut opener = FrameCipher::new(&keys);

    let first = sealer.seal(b"first").unwrap();
    let second = sealer.seal(b"second").unwrap();

    assert!(opener.open(&second).is_err());
    let mut opener = FrameCipher::new(&keys);
    assert_eq!(opener.open(&first).unwrap(), b"first");
    assert_eq!(opener.open(&second).unwrap(), b"second");
    assert_eq!(opener.frames(), 2);
}
