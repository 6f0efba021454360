//! Secure channel.
//!
//! Authenticated key exchange over a raw connection, followed by encrypted,
//! length-prefixed messages.
//!
//! ## Handshake
//!
//! ```text
//!  Dialer                                             Listener
//!    │ ── Propose {nonce, public key record} ───────────▶ │
//!    │ ◀─────────────── Propose {nonce, public key record} ── │
//!    │        (derive remote peer id, check expected id, order)
//!    │ ── Exchange {x25519 epub, sig(props ‖ epub)} ───▶ │
//!    │ ◀──────────────── Exchange {x25519 epub, sig(...)} ── │
//!    │        (verify signature, agree, stretch keys)
//!    │ ── E(remote nonce) ──────────────────────────────▶ │
//!    │ ◀───────────────────────────────── E(remote nonce) ── │
//! ```
//!
//! Both sides run the same steps; `order` breaks the symmetry when choosing which
//! stretched key set encrypts which direction. The final nonce echo proves that both
//! sides derived the same keys.

use crate::error::HandshakeError;
use crate::wire::{self, MessageReader, MessageWriter};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::io;
use strand_core::PeerId;
use strand_core::record::{RecordReader, RecordWriter};
use strand_crypto::aead::{FrameCipher, TAG_SIZE};
use strand_crypto::hash::{hash_concat, stretch_keys};
use strand_crypto::x25519::{EphemeralPublic, EphemeralSecret};
use strand_crypto::{CryptoError, PrivateKey, PublicKey, Signature};
use strand_transport::BoxedIo;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

const NONCE_SIZE: usize = 16;
const MAX_HANDSHAKE_MESSAGE: usize = 4096;

/// Largest plaintext carried by one secure message.
pub const MAX_SECURE_MESSAGE: usize = 1 << 20;

/// An established secure session, ready to be split into halves.
pub struct SecureSession {
    /// Receiving half
    pub reader: SecureReader,
    /// Sending half
    pub writer: SecureWriter,
    /// Authenticated id of the remote peer
    pub remote_peer: PeerId,
    /// Remote identity key
    pub remote_key: PublicKey,
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

/// Decrypting half of a secure session.
pub struct SecureReader {
    io: ReadHalf<BoxedIo>,
    cipher: FrameCipher,
}

/// Encrypting half of a secure session.
pub struct SecureWriter {
    io: WriteHalf<BoxedIo>,
    cipher: FrameCipher,
}

#[async_trait]
impl MessageReader for SecureReader {
    async fn read_msg(&mut self) -> io::Result<Vec<u8>> {
        let sealed = wire::read_prefixed(&mut self.io, MAX_SECURE_MESSAGE + TAG_SIZE).await?;
        self.cipher.open(&sealed).map_err(wire::invalid)
    }
}

#[async_trait]
impl MessageWriter for SecureWriter {
    async fn write_msg(&mut self, msg: &[u8]) -> io::Result<()> {
        if msg.len() > MAX_SECURE_MESSAGE {
            return Err(wire::invalid("secure message too large"));
        }
        let sealed = self.cipher.seal(msg).map_err(wire::invalid)?;
        wire::write_prefixed(&mut self.io, &sealed).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

struct Propose {
    nonce: [u8; NONCE_SIZE],
    key: PublicKey,
}

impl Propose {
    fn encode(&self) -> Vec<u8> {
        RecordWriter::new()
            .bytes(1, &self.nonce)
            .bytes(2, &self.key.to_bytes())
            .finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let mut nonce = None;
        let mut key = None;
        for field in RecordReader::new(bytes) {
            match field? {
                (1, v) => nonce = Some(v.as_bytes()?),
                (2, v) => key = Some(PublicKey::from_bytes(v.as_bytes()?)?),
                _ => {}
            }
        }
        let nonce: [u8; NONCE_SIZE] = nonce
            .and_then(|n| n.try_into().ok())
            .ok_or(HandshakeError::Malformed("propose nonce".into()))?;
        let key = key.ok_or(HandshakeError::Malformed("propose key".into()))?;
        Ok(Self { nonce, key })
    }
}

struct Exchange {
    epub: EphemeralPublic,
    signature: Signature,
}

impl Exchange {
    fn encode(&self) -> Vec<u8> {
        RecordWriter::new()
            .bytes(1, self.epub.as_bytes())
            .bytes(2, self.signature.as_bytes())
            .finish()
    }

    fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let mut epub = None;
        let mut signature = None;
        for field in RecordReader::new(bytes) {
            match field? {
                (1, v) => epub = Some(EphemeralPublic::from_slice(v.as_bytes()?)?),
                (2, v) => signature = Some(Signature::from_slice(v.as_bytes()?)?),
                _ => {}
            }
        }
        Ok(Self {
            epub: epub.ok_or(HandshakeError::Malformed("exchange key".into()))?,
            signature: signature.ok_or(HandshakeError::Malformed("exchange signature".into()))?,
        })
    }
}

/// Run the secure handshake over `io`.
///
/// `expected` is the peer a dialer meant to reach; a listener passes `None` and learns
/// the remote identity from the handshake. On any error the caller must drop `io`.
///
/// # Errors
///
/// `IdentityMismatch` when the remote key does not hash to `expected`, `SelfConnection`
/// when the remote presents our own key, `Crypto` on a bad signature or key
/// confirmation, `Malformed` or `Io` otherwise.
pub async fn secure_handshake(
    mut io: BoxedIo,
    local_key: &PrivateKey,
    expected: Option<&PeerId>,
) -> Result<SecureSession, HandshakeError> {
    let local_pub = local_key.public();

    // Propose
    let mut local_nonce = [0u8; NONCE_SIZE];
    strand_crypto::random_bytes(&mut local_nonce);
    let propose_out = Propose {
        nonce: local_nonce,
        key: local_pub,
    }
    .encode();
    wire::write_prefixed(&mut io, &propose_out).await?;
    let propose_in = wire::read_prefixed(&mut io, MAX_HANDSHAKE_MESSAGE).await?;
    let remote = Propose::decode(&propose_in)?;

    let remote_peer = PeerId::from_public_key(&remote.key);
    if let Some(expected) = expected {
        if *expected != remote_peer {
            return Err(HandshakeError::IdentityMismatch {
                expected: expected.clone(),
                actual: remote_peer,
            });
        }
    }
    if remote.key == local_pub {
        return Err(HandshakeError::SelfConnection);
    }

    let local_key_bytes = local_pub.to_bytes();
    let remote_key_bytes = remote.key.to_bytes();
    let order = hash_concat(&[remote_key_bytes.as_slice(), local_nonce.as_slice()])
        .cmp(&hash_concat(&[local_key_bytes.as_slice(), remote.nonce.as_slice()]));
    if order == Ordering::Equal {
        return Err(HandshakeError::SelfConnection);
    }

    // Exchange
    let ephemeral = EphemeralSecret::generate(&mut rand_core::OsRng);
    let epub = ephemeral.public_key();
    let signed = [propose_out.as_slice(), propose_in.as_slice(), epub.as_bytes().as_slice()].concat();
    let exchange_out = Exchange {
        epub,
        signature: local_key.sign(&signed),
    };
    wire::write_prefixed(&mut io, &exchange_out.encode()).await?;
    let exchange_in = Exchange::decode(&wire::read_prefixed(&mut io, MAX_HANDSHAKE_MESSAGE).await?)?;

    let remote_signed = [
        propose_in.as_slice(),
        propose_out.as_slice(),
        exchange_in.epub.as_bytes().as_slice(),
    ]
    .concat();
    remote
        .key
        .verify(&remote_signed, &exchange_in.signature)
        .inspect_err(|_| tracing::debug!(peer = %remote_peer.short(), "bad exchange signature"))?;

    let shared = ephemeral.agree(&exchange_in.epub)?;
    let salt = match order {
        Ordering::Greater => [local_nonce, remote.nonce].concat(),
        _ => [remote.nonce, local_nonce].concat(),
    };
    let (k1, k2) = stretch_keys(shared.as_bytes(), &salt);
    let (write_keys, read_keys) = match order {
        Ordering::Greater => (k1, k2),
        _ => (k2, k1),
    };
    let mut write_cipher = FrameCipher::new(&write_keys);
    let mut read_cipher = FrameCipher::new(&read_keys);

    // Key confirmation: echo the remote's nonce, expect ours back.
    wire::write_prefixed(&mut io, &write_cipher.seal(&remote.nonce)?).await?;
    let echoed = read_cipher.open(&wire::read_prefixed(&mut io, MAX_HANDSHAKE_MESSAGE).await?)?;
    if echoed != local_nonce {
        return Err(HandshakeError::Crypto(CryptoError::DecryptionFailed));
    }

    tracing::debug!(
        peer = %remote_peer.short(),
        key = %hex::encode(&remote_key_bytes[4..12]),
        "secure channel established"
    );

    let (read_half, write_half) = tokio::io::split(io);
    Ok(SecureSession {
        reader: SecureReader {
            io: read_half,
            cipher: read_cipher,
        },
        writer: SecureWriter {
            io: write_half,
            cipher: write_cipher,
        },
        remote_peer,
        remote_key: remote.key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_crypto::{KeyType, generate_keypair};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn boxed(io: tokio::io::DuplexStream) -> BoxedIo {
        Box::new(io)
    }

    #[tokio::test]
    async fn test_handshake_authenticates_both_sides() {
        let (ka, pa) = generate_keypair(KeyType::Ed25519);
        let (kb, pb) = generate_keypair(KeyType::Ed25519);
        let id_a = PeerId::from_public_key(&pa);
        let id_b = PeerId::from_public_key(&pb);
        let (a, b) = tokio::io::duplex(64 * 1024);

        let (sa, sb) = tokio::join!(
            secure_handshake(boxed(a), &ka, Some(&id_b)),
            secure_handshake(boxed(b), &kb, None)
        );
        let mut sa = sa.unwrap();
        let mut sb = sb.unwrap();
        assert_eq!(sa.remote_peer, id_b);
        assert_eq!(sb.remote_peer, id_a);

        sa.writer.write_msg(b"over the wire").await.unwrap();
        assert_eq!(sb.reader.read_msg().await.unwrap(), b"over the wire");
        sb.writer.write_msg(b"and back").await.unwrap();
        assert_eq!(sa.reader.read_msg().await.unwrap(), b"and back");
    }

    #[tokio::test]
    async fn test_identity_mismatch() {
        let (ka, _) = generate_keypair(KeyType::Ed25519);
        let (kb, _) = generate_keypair(KeyType::Ed25519);
        let (_, _, wrong) = strand_core::peer::generate(KeyType::Ed25519);
        let (a, b) = tokio::io::duplex(64 * 1024);

        let (ra, _rb) = tokio::join!(
            secure_handshake(boxed(a), &ka, Some(&wrong)),
            async move {
                let res = secure_handshake(boxed(b), &kb, None).await;
                assert!(res.is_err());
            }
        );
        assert!(matches!(ra, Err(HandshakeError::IdentityMismatch { .. })));
    }

    #[tokio::test]
    async fn test_self_connection_rejected() {
        let (ka, _) = generate_keypair(KeyType::Ed25519);
        let kb = ka.clone();
        let (a, b) = tokio::io::duplex(64 * 1024);

        let (ra, rb) = tokio::join!(
            secure_handshake(boxed(a), &ka, None),
            secure_handshake(boxed(b), &kb, None)
        );
        assert!(matches!(ra, Err(HandshakeError::SelfConnection)));
        assert!(matches!(rb, Err(HandshakeError::SelfConnection)));
    }

    /// Forward bytes from `from` to `to`, flipping one bit at byte offset `at`.
    async fn tamper<R, W>(mut from: R, mut to: W, at: usize)
    where
        R: tokio::io::AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let mut seen = 0usize;
        let mut buf = [0u8; 1024];
        loop {
            let n = match from.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if (seen..seen + n).contains(&at) {
                buf[at - seen] ^= 0x01;
            }
            seen += n;
            if to.write_all(&buf[..n]).await.is_err() {
                break;
            }
        }
        let _ = to.shutdown().await;
    }

    #[tokio::test]
    async fn test_tampered_handshake_fails_both_sides() {
        // Offsets inside the propose (nonce, key) and the exchange (signature).
        for at in [6usize, 30, 100, 140] {
            let (ka, _) = generate_keypair(KeyType::Ed25519);
            let (kb, _) = generate_keypair(KeyType::Ed25519);

            let (a, a_wire) = tokio::io::duplex(64 * 1024);
            let (b, b_wire) = tokio::io::duplex(64 * 1024);
            let (a_read, a_write) = tokio::io::split(a_wire);
            let (b_read, b_write) = tokio::io::split(b_wire);

            // a -> b is tampered, b -> a passes through untouched
            let forward = tokio::spawn(tamper(a_read, b_write, at));
            let backward = tokio::spawn(tamper(b_read, a_write, usize::MAX));

            let (ra, rb) = tokio::join!(
                secure_handshake(boxed(a), &ka, None),
                secure_handshake(boxed(b), &kb, None)
            );
            assert!(ra.is_err(), "dialer accepted tampered handshake at {at}");
            assert!(rb.is_err(), "listener accepted tampered handshake at {at}");
            forward.abort();
            backward.abort();
        }
    }

    #[tokio::test]
    async fn test_tamper_helper_flips_one_bit() {
        let (mut src, from) = tokio::io::duplex(1024);
        let (to, mut dst) = tokio::io::duplex(1024);
        let relay = tokio::spawn(tamper(from, to, 1));
        src.write_all(b"abc").await.unwrap();
        drop(src);
        let mut out = Vec::new();
        dst.read_to_end(&mut out).await.unwrap();
        relay.await.unwrap();
        assert_eq!(out, vec![b'a', b'b' ^ 0x01, b'c']);
    }
}
