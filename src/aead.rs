//! AEAD: A128GCM, A256GCM, XC20P, A128CBC-HS256, A256CBC-HS512
//!
//! CBC-HS (RFC 7518 §5.2):
//!   key = MAC_KEY || ENC_KEY (equal halves)
//!   tag = HMAC(MAC_KEY, aad || iv || ct || bitlen(aad)[8])[..half]

use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::XChaCha20Poly1305;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::alg::KeyAlg;
use crate::error::KeyError;

pub const GCM_NONCE_BYTES: usize = 12;
pub const XC20P_NONCE_BYTES: usize = 24;
pub const CBC_IV_BYTES: usize = 16;

/// Detached AEAD output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encrypted {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Nonce length for a content-encryption algorithm.
pub fn nonce_len(alg: KeyAlg) -> Result<usize, KeyError> {
    match alg {
        KeyAlg::A128Gcm | KeyAlg::A256Gcm => Ok(GCM_NONCE_BYTES),
        KeyAlg::XC20P => Ok(XC20P_NONCE_BYTES),
        KeyAlg::A128CbcHs256 | KeyAlg::A256CbcHs512 => Ok(CBC_IV_BYTES),
        _ => Err(KeyError::Unsupported),
    }
}

/// Generate a random nonce. Used during encryption only.
pub fn nonce(len: usize) -> Result<Vec<u8>, KeyError> {
    let mut n = vec![0u8; len];
    OsRng.try_fill_bytes(&mut n).map_err(|_| KeyError::Random)?;
    Ok(n)
}

/// AEAD seal with a fresh nonce.
pub(crate) fn encrypt(
    alg: KeyAlg,
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Encrypted, KeyError> {
    if key.len() != alg.key_len() {
        return Err(KeyError::InvalidKey);
    }
    let nonce = nonce(nonce_len(alg)?)?;
    let (ciphertext, tag) = match alg {
        KeyAlg::A128Gcm => seal_detached::<Aes128Gcm>(key, &nonce, plaintext, aad)?,
        KeyAlg::A256Gcm => seal_detached::<Aes256Gcm>(key, &nonce, plaintext, aad)?,
        KeyAlg::XC20P => seal_detached::<XChaCha20Poly1305>(key, &nonce, plaintext, aad)?,
        KeyAlg::A128CbcHs256 | KeyAlg::A256CbcHs512 => cbc_hs_seal(key, &nonce, plaintext, aad)?,
        _ => return Err(KeyError::Unsupported),
    };
    Ok(Encrypted {
        ciphertext,
        nonce,
        tag,
    })
}

/// AEAD open. Every failure is the same `Decryption` error.
pub(crate) fn decrypt(
    alg: KeyAlg,
    key: &[u8],
    ciphertext: &[u8],
    nonce: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, KeyError> {
    if key.len() != alg.key_len() {
        return Err(KeyError::Decryption);
    }
    if nonce.len() != nonce_len(alg)? {
        return Err(KeyError::Decryption);
    }
    match alg {
        KeyAlg::A128Gcm => open_detached::<Aes128Gcm>(key, nonce, ciphertext, tag, aad),
        KeyAlg::A256Gcm => open_detached::<Aes256Gcm>(key, nonce, ciphertext, tag, aad),
        KeyAlg::XC20P => open_detached::<XChaCha20Poly1305>(key, nonce, ciphertext, tag, aad),
        KeyAlg::A128CbcHs256 | KeyAlg::A256CbcHs512 => {
            cbc_hs_open(key, nonce, ciphertext, tag, aad)
        }
        _ => Err(KeyError::Unsupported),
    }
}

// ---------------------------------------------------------------------------
// AEAD constructions (GCM, XChaCha20-Poly1305)
// ---------------------------------------------------------------------------

fn seal_detached<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), KeyError> {
    if nonce.len() != <C::NonceSize as Unsigned>::USIZE {
        return Err(KeyError::Encryption);
    }
    let cipher = C::new_from_slice(key).map_err(|_| KeyError::InvalidKey)?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| KeyError::Encryption)?;
    Ok((buffer, tag.to_vec()))
}

fn open_detached<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, KeyError> {
    if nonce.len() != <C::NonceSize as Unsigned>::USIZE
        || tag.len() != <C::TagSize as Unsigned>::USIZE
    {
        return Err(KeyError::Decryption);
    }
    let cipher = C::new_from_slice(key).map_err(|_| KeyError::Decryption)?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| KeyError::Decryption)?;
    Ok(buffer)
}

// ---------------------------------------------------------------------------
// AES-CBC + HMAC-SHA2
// ---------------------------------------------------------------------------

fn cbc_hs_seal(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), KeyError> {
    let (mac_key, enc_key) = key.split_at(key.len() / 2);
    let ciphertext = match enc_key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| KeyError::InvalidKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| KeyError::InvalidKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => return Err(KeyError::InvalidKey),
    };
    let tag = cbc_hs_tag(mac_key, aad, iv, &ciphertext)?;
    Ok((ciphertext, tag))
}

fn cbc_hs_open(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, KeyError> {
    let (mac_key, enc_key) = key.split_at(key.len() / 2);

    // MAC before padding is examined
    let expected = cbc_hs_tag(mac_key, aad, iv, ciphertext).map_err(|_| KeyError::Decryption)?;
    if !bool::from(expected.as_slice().ct_eq(tag)) {
        return Err(KeyError::Decryption);
    }

    match enc_key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| KeyError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| KeyError::Decryption),
        32 => cbc::Decryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| KeyError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| KeyError::Decryption),
        _ => Err(KeyError::Decryption),
    }
}

/// Truncated HMAC; SHA-256 for 16-byte MAC keys, SHA-512 for 32-byte ones.
fn cbc_hs_tag(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
    let al = ((aad.len() as u64) * 8).to_be_bytes();
    let tag_len = mac_key.len();
    let full = match mac_key.len() {
        16 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                .map_err(|_| KeyError::InvalidKey)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            mac.finalize().into_bytes().to_vec()
        }
        32 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
                .map_err(|_| KeyError::InvalidKey)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            mac.finalize().into_bytes().to_vec()
        }
        _ => return Err(KeyError::InvalidKey),
    };
    Ok(full[..tag_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_ALGS: [KeyAlg; 5] = [
        KeyAlg::A128Gcm,
        KeyAlg::A256Gcm,
        KeyAlg::A128CbcHs256,
        KeyAlg::A256CbcHs512,
        KeyAlg::XC20P,
    ];

    #[test]
    fn seal_open_each_alg() {
        for alg in CONTENT_ALGS {
            let key = vec![0x5Au8; alg.key_len()];
            let enc = encrypt(alg, &key, b"attack at dawn", b"aad").unwrap();
            assert_eq!(enc.nonce.len(), nonce_len(alg).unwrap());
            let pt = decrypt(alg, &key, &enc.ciphertext, &enc.nonce, &enc.tag, b"aad").unwrap();
            assert_eq!(pt, b"attack at dawn", "{alg}");
        }
    }

    #[test]
    fn tag_lengths() {
        for (alg, len) in [
            (KeyAlg::A128Gcm, 16),
            (KeyAlg::A256Gcm, 16),
            (KeyAlg::XC20P, 16),
            (KeyAlg::A128CbcHs256, 16),
            (KeyAlg::A256CbcHs512, 32),
        ] {
            let key = vec![1u8; alg.key_len()];
            assert_eq!(encrypt(alg, &key, b"x", b"").unwrap().tag.len(), len);
        }
    }

    #[test]
    fn wrong_aad_and_truncated_tag_fail() {
        for alg in CONTENT_ALGS {
            let key = vec![0x33u8; alg.key_len()];
            let enc = encrypt(alg, &key, b"payload", b"good").unwrap();
            assert_eq!(
                decrypt(alg, &key, &enc.ciphertext, &enc.nonce, &enc.tag, b"bad"),
                Err(KeyError::Decryption)
            );
            assert_eq!(
                decrypt(alg, &key, &enc.ciphertext, &enc.nonce, &enc.tag[1..], b"good"),
                Err(KeyError::Decryption)
            );
            assert_eq!(
                decrypt(alg, &key, &enc.ciphertext, &enc.nonce[1..], &enc.tag, b"good"),
                Err(KeyError::Decryption)
            );
        }
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        assert_eq!(
            encrypt(KeyAlg::A256Gcm, &[0u8; 16], b"x", b"").unwrap_err(),
            KeyError::InvalidKey
        );
        assert_eq!(
            encrypt(KeyAlg::X25519, &[], b"x", b"").unwrap_err(),
            KeyError::Unsupported
        );
    }
}
