//! Zeroization validation tests
//!
//! Verifies that sensitive cryptographic material is zeroized on drop, and that the
//! types which can be wiped in place really end up as zeros.

use strand_crypto::PrivateKey;
use strand_crypto::aead::{AeadKey, FrameCipher};
use strand_crypto::hash::{DirectionKeys, stretch_keys};
use strand_crypto::x25519::{EphemeralSecret, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

fn is_zeroed(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

fn assert_zeroize_on_drop<T: ZeroizeOnDrop>() {}

#[test]
fn test_secret_types_zeroize_on_drop() {
    assert_zeroize_on_drop::<PrivateKey>();
    assert_zeroize_on_drop::<AeadKey>();
    assert_zeroize_on_drop::<FrameCipher>();
    assert_zeroize_on_drop::<EphemeralSecret>();
    assert_zeroize_on_drop::<SharedSecret>();
    assert_zeroize_on_drop::<DirectionKeys>();
}

#[test]
fn test_direction_keys_wiped_in_place() {
    let (mut keys, _) = stretch_keys(&[0x42; 32], b"wipe");
    assert!(!is_zeroed(&keys.cipher_key));
    assert!(!is_zeroed(&keys.nonce_salt));

    keys.zeroize();
    assert!(is_zeroed(&keys.cipher_key));
    assert!(is_zeroed(&keys.nonce_salt));
}

#[test]
fn test_shared_secret_wiped_in_place() {
    let alice = EphemeralSecret::generate(&mut rand_core::OsRng);
    let bob = EphemeralSecret::generate(&mut rand_core::OsRng);
    let mut shared = alice.agree(&bob.public_key()).unwrap();
    assert!(!is_zeroed(shared.as_bytes()));

    shared.zeroize();
    assert!(is_zeroed(shared.as_bytes()));
}

#[test]
fn test_encoded_private_key_can_be_wiped() {
    let key = PrivateKey::from_seed(&[9u8; 32]);
    let mut encoded = key.to_bytes();
    assert!(!is_zeroed(&encoded));

    encoded.zeroize();
    assert!(encoded.is_empty());
}
