//! Key agreement: ECDH-ES and ECDH-1PU over an [`EnvelopeKey`].
//!
//! Pairings (sender | receiver):
//!   ES   Z  = ephem x recip           | recip x ephem
//!   1PU  Ze = ephem x recip           | recip x ephem
//!        Zs = sender x recip          | recip x sender
//!
//! Both sides must land on the same Z or the derived keys diverge silently.

use zeroize::Zeroizing;

use crate::alg::KeyAlg;
use crate::error::KeyError;
use crate::kdf;
use crate::key::{EnvelopeKey, SharedSecret};

/// Raw ECDH between a private and a public key.
pub fn derive_shared_secret<K: EnvelopeKey>(private: &K, public: &K) -> Result<SharedSecret, KeyError> {
    private.key_exchange(public)
}

/// A key-agreement scheme able to produce wrapping-key bytes.
pub trait KeyAgreement {
    /// Derive `keydatalen` bytes; `cc_tag` is bound in when non-empty.
    fn derive_key_bytes(
        &self,
        keydatalen: usize,
        cc_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError>;

    /// Derive a symmetric key of algorithm `alg`.
    fn derive_key<K: EnvelopeKey>(&self, alg: KeyAlg, cc_tag: &[u8]) -> Result<K, KeyError> {
        if alg.is_agreement() {
            return Err(KeyError::Unsupported);
        }
        let bytes = self.derive_key_bytes(alg.key_len(), cc_tag)?;
        K::from_secret_bytes(alg, &bytes)
    }
}

/// Ephemeral-static agreement (anoncrypt).
#[derive(Debug)]
pub struct EcdhEs<'a, K> {
    ephem: &'a K,
    recip: &'a K,
    alg: &'a [u8],
    apu: &'a [u8],
    apv: &'a [u8],
    receive: bool,
}

impl<'a, K: EnvelopeKey> EcdhEs<'a, K> {
    pub fn new(
        ephem: &'a K,
        recip: &'a K,
        alg: &'a [u8],
        apu: &'a [u8],
        apv: &'a [u8],
        receive: bool,
    ) -> Self {
        Self {
            ephem,
            recip,
            alg,
            apu,
            apv,
            receive,
        }
    }
}

impl<K: EnvelopeKey> KeyAgreement for EcdhEs<'_, K> {
    fn derive_key_bytes(
        &self,
        keydatalen: usize,
        cc_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let z = if self.receive {
            derive_shared_secret(self.recip, self.ephem)?
        } else {
            derive_shared_secret(self.ephem, self.recip)?
        };
        kdf::concat_kdf_tagged(&z, self.alg, self.apu, self.apv, keydatalen, cc_tag)
    }
}

/// One-pass unified agreement (authcrypt): ephemeral-static plus static-static.
#[derive(Debug)]
pub struct Ecdh1Pu<'a, K> {
    ephem: &'a K,
    send: &'a K,
    recip: &'a K,
    alg: &'a [u8],
    apu: &'a [u8],
    apv: &'a [u8],
    receive: bool,
}

impl<'a, K: EnvelopeKey> Ecdh1Pu<'a, K> {
    /// On the receiving side `send` and `ephem` are public keys and `recip`
    /// holds the secret; when sending it is the other way around.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ephem: &'a K,
        send: &'a K,
        recip: &'a K,
        alg: &'a [u8],
        apu: &'a [u8],
        apv: &'a [u8],
        receive: bool,
    ) -> Self {
        Self {
            ephem,
            send,
            recip,
            alg,
            apu,
            apv,
            receive,
        }
    }
}

impl<K: EnvelopeKey> KeyAgreement for Ecdh1Pu<'_, K> {
    fn derive_key_bytes(
        &self,
        keydatalen: usize,
        cc_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let (ze, zs) = if self.receive {
            (
                derive_shared_secret(self.recip, self.ephem)?,
                derive_shared_secret(self.recip, self.send)?,
            )
        } else {
            (
                derive_shared_secret(self.ephem, self.recip)?,
                derive_shared_secret(self.send, self.recip)?,
            )
        };
        kdf::derive_1pu(&ze, &zs, self.alg, self.apu, self.apv, keydatalen, cc_tag)
    }
}
