//! Concat KDF (NIST SP 800-56A, single pass, SHA-256)
//!
//! input = round[4] || Z || len(alg)[4] || alg || len(apu)[4] || apu
//!         || len(apv)[4] || apv || keydatalen_bits[4] [ || len(cc_tag)[4] || cc_tag ]
//! key   = SHA-256(input)[..keydatalen]
//!
//! ECDH-1PU feeds Z = Ze || Zs.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::KeyError;

/// One SHA-256 pass: the largest key this KDF hands out.
pub const MAX_KEY_BYTES: usize = 32;

/// Derive `keydatalen` bytes from a shared secret.
pub fn concat_kdf(
    secret: &[u8],
    alg: &[u8],
    apu: &[u8],
    apv: &[u8],
    keydatalen: usize,
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    concat_kdf_tagged(secret, alg, apu, apv, keydatalen, &[])
}

/// [`concat_kdf`] with the ciphertext tag appended as supplementary public info.
pub fn concat_kdf_tagged(
    secret: &[u8],
    alg: &[u8],
    apu: &[u8],
    apv: &[u8],
    keydatalen: usize,
    cc_tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    ConcatKdf::new()
        .secret(secret)
        .finish(alg, apu, apv, keydatalen, cc_tag)
}

/// ECDH-1PU derivation: both secrets enter one KDF pass as `ze || zs`.
pub fn derive_1pu(
    ze: &[u8],
    zs: &[u8],
    alg: &[u8],
    apu: &[u8],
    apv: &[u8],
    keydatalen: usize,
    cc_tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    ConcatKdf::new()
        .secret(ze)
        .secret(zs)
        .finish(alg, apu, apv, keydatalen, cc_tag)
}

/// Incremental hasher so secrets are never copied into a joint buffer.
struct ConcatKdf {
    hasher: Sha256,
}

impl ConcatKdf {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(1u32.to_be_bytes());
        Self { hasher }
    }

    fn secret(mut self, z: &[u8]) -> Self {
        self.hasher.update(z);
        self
    }

    fn prefixed(&mut self, data: &[u8]) -> Result<(), KeyError> {
        let len = u32::try_from(data.len()).map_err(|_| KeyError::InvalidKey)?;
        self.hasher.update(len.to_be_bytes());
        self.hasher.update(data);
        Ok(())
    }

    fn finish(
        mut self,
        alg: &[u8],
        apu: &[u8],
        apv: &[u8],
        keydatalen: usize,
        cc_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        if keydatalen == 0 || keydatalen > MAX_KEY_BYTES {
            return Err(KeyError::InvalidKey);
        }
        self.prefixed(alg)?;
        self.prefixed(apu)?;
        self.prefixed(apv)?;
        self.hasher.update(((keydatalen * 8) as u32).to_be_bytes());
        if !cc_tag.is_empty() {
            self.prefixed(cc_tag)?;
        }

        let digest = self.hasher.finalize();
        Ok(Zeroizing::new(digest[..keydatalen].to_vec()))
    }
}
