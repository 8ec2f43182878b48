//! Anonymous encryption (ECDH-ES+A*KW).
//!
//! pack:   cek <- random(enc)
//!         per recipient: epk <- ephemeral(curve(recip))
//!                        kek  = ConcatKDF(epk x recip, alg, "", "")
//!                        header = { kid, epk }, encrypted_key = AESKW(kek, cek)
//!         ciphertext = AEAD(cek, plaintext, aad = protected)
//!
//! No sender authentication: anyone holding a recipient's public key can
//! produce a valid envelope.

use std::collections::BTreeMap;

use tracing::debug;

use crate::agreement::{EcdhEs, KeyAgreement};
use crate::alg::{ContentEncryption, KeyManagement, KeyWrap};
use crate::envelope::{
    EnvelopeBuilder, JweEnvelope, JweRecipient, ProtectedHeader, RecipientHeader,
};
use crate::error::{invalid, EnvelopeError};
use crate::key::EnvelopeKey;

/// Encrypt `plaintext` to every key in `recipients`.
pub fn encrypt<K: EnvelopeKey>(
    recipients: &BTreeMap<String, K>,
    wrap: KeyWrap,
    enc: ContentEncryption,
    plaintext: &[u8],
) -> Result<JweEnvelope, EnvelopeError> {
    if recipients.is_empty() {
        return Err(EnvelopeError::NoRecipients);
    }
    let alg = KeyManagement::EcdhEs(wrap).header_value();

    let mut builder = EnvelopeBuilder::new();
    builder.set_protected(ProtectedHeader::new(alg.as_str(), enc))?;

    let cek = K::generate(enc.key_alg())?;
    for (kid, recip) in recipients {
        let curve = recip.algorithm();
        if !curve.is_agreement() {
            return Err(EnvelopeError::KeyAgreementFailure);
        }
        let epk = K::generate_ephemeral(curve)?;
        let kek: K = EcdhEs::new(&epk, recip, alg.as_bytes(), &[], &[], false)
            .derive_key(wrap.key_alg(), &[])?;
        builder.add_recipient(JweRecipient {
            encrypted_key: kek.wrap_key(&cek)?,
            header: RecipientHeader {
                kid: kid.clone(),
                epk: Some(epk.to_jwk_public()?),
            },
        })?;
    }

    let sealed = cek.aead_encrypt(plaintext, builder.protected_bytes()?)?;
    builder.set_payload(sealed.ciphertext, sealed.nonce, sealed.tag);
    debug!(%alg, %enc, recipients = recipients.len(), "anoncrypt packed");
    builder.build()
}

/// Decrypt as recipient `kid` holding the static secret `key`.
pub fn decrypt<K: EnvelopeKey>(
    envelope: &JweEnvelope,
    kid: &str,
    key: &K,
    wrap: KeyWrap,
    enc: ContentEncryption,
) -> Result<Vec<u8>, EnvelopeError> {
    let recipient = envelope
        .get_recipient(kid)
        .ok_or(EnvelopeError::NoRecognizedRecipient)?;
    let epk = recipient
        .header
        .epk
        .as_ref()
        .ok_or_else(|| invalid("recipient header has no epk"))?;
    if epk.d.is_some() {
        return Err(invalid("epk carries a private component"));
    }
    let epk = K::from_jwk(epk)?;

    let alg = KeyManagement::EcdhEs(wrap).header_value();
    let kek: K = EcdhEs::new(&epk, key, alg.as_bytes(), &[], &[], true)
        .derive_key(wrap.key_alg(), &[])?;
    let cek = kek.unwrap_key(enc.key_alg(), &recipient.encrypted_key)?;
    let plaintext = cek.aead_decrypt(
        envelope.ciphertext(),
        envelope.iv(),
        envelope.tag(),
        envelope.protected_bytes(),
    )?;
    Ok(plaintext)
}
