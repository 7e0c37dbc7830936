//! Encryption of share pieces to their receivers.
//!
//! To encrypt a piece for receiver `R` under ephemeral key `e`:
//! 1. Shared point: S = e · pk_R (Diffie-Hellman on G2)
//! 2. key = HKDF-SHA256(S, "committee-share-piece")
//! 3. AES-256-GCM over the 32-byte share, associated data `seed || id_R`
//!
//! The receiver computes the same point as sk_R · (e · G2). The nonce is
//! shared by all pieces of one packet; every receiver has its own key.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use committee_crypto::{CryptoError, Id, Pubkey, Seckey};
use committee_types::Hash;
use hkdf::Hkdf;
use sha2::Sha256;

pub const NONCE_LENGTH: usize = 12;
pub const CIPHERTEXT_LENGTH: usize = 32 + 16;

const KEY_INFO: &[u8] = b"committee-share-piece";

/// Encrypt `share` for `receiver`, whose public key is `receiver_pk`.
pub fn encrypt_piece(
    enc_seckey: &Seckey,
    receiver_pk: &Pubkey,
    receiver: &Id,
    seed: &Hash,
    nonce: &[u8; NONCE_LENGTH],
    share: &Seckey,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = piece_cipher(&enc_seckey.dh(receiver_pk))?;
    let aad = associated_data(seed, receiver);
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &share.to_bytes(),
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("AES-GCM encryption failed: {}", e)))
}

/// Decrypt a piece addressed to the holder of `own_seckey`.
pub fn decrypt_piece(
    own_seckey: &Seckey,
    enc_pubkey: &Pubkey,
    receiver: &Id,
    seed: &Hash,
    nonce: &[u8; NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Seckey, CryptoError> {
    decrypt_with_shared(&own_seckey.dh(enc_pubkey), receiver, seed, nonce, ciphertext)
}

/// Decrypt a piece with the sender's revealed ephemeral key.
pub fn decrypt_piece_revealed(
    enc_seckey: &Seckey,
    receiver_pk: &Pubkey,
    receiver: &Id,
    seed: &Hash,
    nonce: &[u8; NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Seckey, CryptoError> {
    decrypt_with_shared(&enc_seckey.dh(receiver_pk), receiver, seed, nonce, ciphertext)
}

fn decrypt_with_shared(
    shared: &Pubkey,
    receiver: &Id,
    seed: &Hash,
    nonce: &[u8; NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Seckey, CryptoError> {
    if ciphertext.len() != CIPHERTEXT_LENGTH {
        return Err(CryptoError::InvalidLength {
            expected: CIPHERTEXT_LENGTH,
            got: ciphertext.len(),
        });
    }
    let cipher = piece_cipher(shared)?;
    let aad = associated_data(seed, receiver);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Seckey::from_bytes(&plaintext)
}

fn piece_cipher(shared: &Pubkey) -> Result<Aes256Gcm, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, &shared.to_bytes());
    let mut key = [0u8; 32];
    hk.expand(KEY_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Failed to create cipher: {}", e)))
}

fn associated_data(seed: &Hash, receiver: &Id) -> Vec<u8> {
    let mut aad = Vec::with_capacity(64);
    aad.extend_from_slice(seed.as_bytes());
    aad.extend_from_slice(&receiver.to_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    struct Fixture {
        enc: Seckey,
        receiver_sk: Seckey,
        receiver: Id,
        seed: Hash,
        nonce: [u8; NONCE_LENGTH],
        share: Seckey,
    }

    fn fixture() -> Fixture {
        let receiver_sk = Seckey::random(&mut OsRng);
        Fixture {
            enc: Seckey::random(&mut OsRng),
            receiver: Id::from_pubkey(&receiver_sk.pubkey()),
            receiver_sk,
            seed: Hash([5u8; 32]),
            nonce: [7u8; NONCE_LENGTH],
            share: Seckey::random(&mut OsRng),
        }
    }

    #[test]
    fn test_receiver_decrypts() {
        let f = fixture();
        let ct = encrypt_piece(&f.enc, &f.receiver_sk.pubkey(), &f.receiver, &f.seed, &f.nonce, &f.share)
            .unwrap();
        assert_eq!(ct.len(), CIPHERTEXT_LENGTH);

        let got = decrypt_piece(&f.receiver_sk, &f.enc.pubkey(), &f.receiver, &f.seed, &f.nonce, &ct).unwrap();
        assert_eq!(got, f.share);

        let revealed =
            decrypt_piece_revealed(&f.enc, &f.receiver_sk.pubkey(), &f.receiver, &f.seed, &f.nonce, &ct)
                .unwrap();
        assert_eq!(revealed, f.share);
    }

    #[test]
    fn test_encryption_is_reproducible() {
        let f = fixture();
        let pk = f.receiver_sk.pubkey();
        let a = encrypt_piece(&f.enc, &pk, &f.receiver, &f.seed, &f.nonce, &f.share).unwrap();
        let b = encrypt_piece(&f.enc, &pk, &f.receiver, &f.seed, &f.nonce, &f.share).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_key_or_context_fails() {
        let f = fixture();
        let ct = encrypt_piece(&f.enc, &f.receiver_sk.pubkey(), &f.receiver, &f.seed, &f.nonce, &f.share)
            .unwrap();

        let stranger = Seckey::random(&mut OsRng);
        assert_eq!(
            decrypt_piece(&stranger, &f.enc.pubkey(), &f.receiver, &f.seed, &f.nonce, &ct),
            Err(CryptoError::AuthenticationFailed)
        );

        let other_seed = Hash([6u8; 32]);
        assert!(decrypt_piece(&f.receiver_sk, &f.enc.pubkey(), &f.receiver, &other_seed, &f.nonce, &ct).is_err());

        let mut tampered = ct.clone();
        tampered[0] ^= 1;
        assert!(decrypt_piece(&f.receiver_sk, &f.enc.pubkey(), &f.receiver, &f.seed, &f.nonce, &tampered).is_err());

        assert_eq!(
            decrypt_piece(&f.receiver_sk, &f.enc.pubkey(), &f.receiver, &f.seed, &f.nonce, &ct[..40]),
            Err(CryptoError::InvalidLength { expected: CIPHERTEXT_LENGTH, got: 40 })
        );
    }
}
