//! Pack / unpack orchestration.
//!
//! unpack:
//!   parse -> classify alg/enc -> (1PU) apu/skid check
//!   -> first envelope kid held locally -> (1PU) sender public key
//!   -> engine decrypt
//!
//! Stateless per call; the key store lookups are the only suspension points.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::alg::{ContentEncryption, KeyManagement, KeyWrap};
use crate::envelope::JweEnvelope;
use crate::error::{invalid, EnvelopeError};
use crate::key::EnvelopeKey;
use crate::store::KeyStore;
use crate::{ecdh_1pu, ecdh_es};

/// Algorithm and serialization choices for outbound envelopes.
///
/// Unpacking reads the algorithms from the envelope itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackConfig {
    pub key_wrap: KeyWrap,
    /// Content encryption without a sender.
    pub anon_enc: ContentEncryption,
    /// Content encryption with a sender; must be a CBC-HMAC mode.
    pub auth_enc: ContentEncryption,
    /// Emit the flattened form when there is exactly one recipient.
    pub flatten: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            key_wrap: KeyWrap::A256Kw,
            anon_enc: ContentEncryption::XC20P,
            auth_enc: ContentEncryption::A256CbcHs512,
            flatten: false,
        }
    }
}

/// A decrypted envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct Unpacked {
    pub plaintext: Vec<u8>,
    pub recipient_kid: String,
    /// Set for authenticated (ECDH-1PU) envelopes only.
    pub sender_kid: Option<String>,
}

impl core::fmt::Debug for Unpacked {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Unpacked")
            .field("plaintext_len", &self.plaintext.len())
            .field("recipient_kid", &self.recipient_kid)
            .field("sender_kid", &self.sender_kid)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Packer {
    config: PackConfig,
}

impl Packer {
    pub fn new(config: PackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Encrypt `plaintext` to `recipients`; authenticated when `sender` is given.
    pub fn pack<K: EnvelopeKey>(
        &self,
        recipients: &BTreeMap<String, K>,
        sender: Option<(&str, &K)>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let envelope = match sender {
            Some((skid, key)) => ecdh_1pu::encrypt(
                recipients,
                skid,
                key,
                self.config.key_wrap,
                self.config.auth_enc,
                plaintext,
            )?,
            None => ecdh_es::encrypt(
                recipients,
                self.config.key_wrap,
                self.config.anon_enc,
                plaintext,
            )?,
        };
        if self.config.flatten && envelope.recipients().len() == 1 {
            envelope.to_json_flattened()
        } else {
            envelope.to_json()
        }
    }

    /// Decrypt `envelope` with whatever matching key `store` holds.
    ///
    /// The configuration only shapes outbound envelopes: any supported
    /// `alg`/`enc` pair is accepted here, whatever this packer would emit.
    pub async fn unpack<S: KeyStore>(
        &self,
        store: &S,
        envelope: &[u8],
    ) -> Result<Unpacked, EnvelopeError> {
        let envelope = JweEnvelope::from_json(envelope)?;
        let result = self.open(store, &envelope).await;
        if let Err(e) = &result {
            warn!(kind = e.kind(), alg = %envelope.protected().alg, "unpack failed");
        }
        result
    }

    async fn open<S: KeyStore>(
        &self,
        store: &S,
        envelope: &JweEnvelope,
    ) -> Result<Unpacked, EnvelopeError> {
        let protected = envelope.protected();
        let management: KeyManagement = protected.alg.parse()?;
        let enc: ContentEncryption = protected.enc.parse()?;

        // sender identity is settled before any key is touched
        let sender_kid = match management {
            KeyManagement::Ecdh1Pu(_) => {
                if !enc.allowed_with_1pu() {
                    return Err(EnvelopeError::UnsupportedAlgorithm(enc.to_string()));
                }
                Some(ecdh_1pu::sender_kid(protected)?)
            }
            KeyManagement::EcdhEs(_) => None,
        };

        let kids = envelope.recipient_kids();
        let mut local: HashMap<String, S::Key> =
            store.fetch_local_keys(&kids).await?.into_iter().collect();
        let (recipient_kid, key) = kids
            .iter()
            .find_map(|kid| local.remove_entry(kid))
            .ok_or(EnvelopeError::NoRecognizedRecipient)?;
        debug!(%management, %enc, kid = %recipient_kid, "recipient resolved");

        let plaintext = match (management, sender_kid.as_deref()) {
            (KeyManagement::Ecdh1Pu(wrap), Some(skid)) => {
                let sender = store
                    .fetch_public_key(skid)
                    .await?
                    .ok_or_else(|| EnvelopeError::SenderKeyNotFound(skid.to_string()))?;
                ecdh_1pu::decrypt(envelope, &recipient_kid, &key, &sender, wrap, enc)?
            }
            (KeyManagement::EcdhEs(wrap), _) => {
                ecdh_es::decrypt(envelope, &recipient_kid, &key, wrap, enc)?
            }
            (KeyManagement::Ecdh1Pu(_), None) => {
                return Err(invalid("no sender key identifier"))
            }
        };

        Ok(Unpacked {
            plaintext,
            recipient_kid,
            sender_kid,
        })
    }
}

/// [`Packer::pack`] with the default configuration.
pub fn pack<K: EnvelopeKey>(
    recipients: &BTreeMap<String, K>,
    sender: Option<(&str, &K)>,
    plaintext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    Packer::default().pack(recipients, sender, plaintext)
}

/// [`Packer::unpack`] with the default configuration.
pub async fn unpack<S: KeyStore>(store: &S, envelope: &[u8]) -> Result<Unpacked, EnvelopeError> {
    Packer::default().unpack(store, envelope).await
}
