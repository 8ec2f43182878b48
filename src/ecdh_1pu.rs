//! Sender-authenticated encryption (ECDH-1PU+A*KW).
//!
//! pack:   epk <- ephemeral(curve(sender)), shared by every recipient
//!         apu = b64u(skid), apv = b64u(sorted(kids).join("."))
//!         protected = { alg, enc, apu, apv, epk, skid }
//!         ciphertext, tag = AEAD(cek, plaintext, aad = combined_aad)
//!         per recipient: kek = ConcatKDF(Ze || Zs, alg, apu, apv, cc_tag = tag)
//!                        header = { kid }, encrypted_key = AESKW(kek, cek)
//!
//! The KDF takes `apu`/`apv` as the header text, not the decoded bytes.
//! Content encryption is limited to the CBC-HMAC modes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::debug;

use crate::agreement::{Ecdh1Pu, KeyAgreement};
use crate::alg::{ContentEncryption, KeyManagement, KeyWrap};
use crate::envelope::{
    combined_aad, EnvelopeBuilder, JweEnvelope, JweRecipient, ProtectedHeader, RecipientHeader,
};
use crate::error::{invalid, EnvelopeError};
use crate::key::EnvelopeKey;

/// `apv` value: base64url of the sorted recipient kids joined by '.'.
pub fn apv_for<'a>(kids: impl IntoIterator<Item = &'a str>) -> String {
    let mut kids: Vec<&str> = kids.into_iter().collect();
    kids.sort_unstable();
    URL_SAFE_NO_PAD.encode(kids.join("."))
}

/// The sender kid claimed by a protected header.
///
/// When both `apu` and `skid` are present they must name the same key.
pub fn sender_kid(protected: &ProtectedHeader) -> Result<String, EnvelopeError> {
    let from_apu = protected
        .apu
        .as_deref()
        .map(|apu| URL_SAFE_NO_PAD.decode(apu).map_err(|_| invalid("apu is not base64url")))
        .transpose()?;
    match (from_apu, protected.skid.as_deref()) {
        (Some(apu), Some(skid)) => {
            if apu != skid.as_bytes() {
                return Err(EnvelopeError::ApuSkidMismatch);
            }
            Ok(skid.to_string())
        }
        (Some(apu), None) => String::from_utf8(apu).map_err(|_| invalid("apu is not utf-8")),
        (None, Some(skid)) => Ok(skid.to_string()),
        (None, None) => Err(invalid("no sender key identifier")),
    }
}

/// Encrypt `plaintext` from `sender` to every key in `recipients`.
pub fn encrypt<K: EnvelopeKey>(
    recipients: &BTreeMap<String, K>,
    sender_kid: &str,
    sender: &K,
    wrap: KeyWrap,
    enc: ContentEncryption,
    plaintext: &[u8],
) -> Result<JweEnvelope, EnvelopeError> {
    if recipients.is_empty() {
        return Err(EnvelopeError::NoRecipients);
    }
    if !enc.allowed_with_1pu() {
        return Err(EnvelopeError::UnsupportedAlgorithm(enc.to_string()));
    }
    let curve = sender.algorithm();
    if !curve.is_agreement() || recipients.values().any(|k| k.algorithm() != curve) {
        return Err(EnvelopeError::KeyAgreementFailure);
    }

    let alg = KeyManagement::Ecdh1Pu(wrap).header_value();
    let apu = URL_SAFE_NO_PAD.encode(sender_kid);
    let apv = apv_for(recipients.keys().map(String::as_str));
    let epk = K::generate_ephemeral(curve)?;

    let mut builder = EnvelopeBuilder::new();
    builder.set_protected(ProtectedHeader {
        alg: alg.clone(),
        enc: enc.as_str().to_string(),
        apu: Some(apu.clone()),
        apv: Some(apv.clone()),
        epk: Some(epk.to_jwk_public()?),
        skid: Some(sender_kid.to_string()),
    })?;

    // BTreeMap order is the envelope order, so the AAD is fixed up front
    let headers: Vec<RecipientHeader> = recipients.keys().map(RecipientHeader::kid).collect();
    let aad = combined_aad(builder.protected_bytes()?, &headers)?;

    let cek = K::generate(enc.key_alg())?;
    let sealed = cek.aead_encrypt(plaintext, &aad)?;

    for (header, recip) in headers.into_iter().zip(recipients.values()) {
        let kek: K = Ecdh1Pu::new(
            &epk,
            sender,
            recip,
            alg.as_bytes(),
            apu.as_bytes(),
            apv.as_bytes(),
            false,
        )
        .derive_key(wrap.key_alg(), &sealed.tag)?;
        builder.add_recipient(JweRecipient {
            encrypted_key: kek.wrap_key(&cek)?,
            header,
        })?;
    }

    builder.set_payload(sealed.ciphertext, sealed.nonce, sealed.tag);
    debug!(%alg, %enc, skid = sender_kid, recipients = recipients.len(), "authcrypt packed");
    builder.build()
}

/// Decrypt as recipient `kid` (static secret `key`) from `sender`'s public key.
pub fn decrypt<K: EnvelopeKey>(
    envelope: &JweEnvelope,
    kid: &str,
    key: &K,
    sender: &K,
    wrap: KeyWrap,
    enc: ContentEncryption,
) -> Result<Vec<u8>, EnvelopeError> {
    if !enc.allowed_with_1pu() {
        return Err(EnvelopeError::UnsupportedAlgorithm(enc.to_string()));
    }
    let protected = envelope.protected();
    let recipient = envelope
        .get_recipient(kid)
        .ok_or(EnvelopeError::NoRecognizedRecipient)?;
    let epk = protected
        .epk
        .as_ref()
        .ok_or_else(|| invalid("protected header has no epk"))?;
    if epk.d.is_some() {
        return Err(invalid("epk carries a private component"));
    }
    let epk = K::from_jwk(epk)?;

    let alg = KeyManagement::Ecdh1Pu(wrap).header_value();
    let apu = protected.apu.as_deref().unwrap_or_default();
    let apv = protected.apv.as_deref().unwrap_or_default();
    let kek: K = Ecdh1Pu::new(
        &epk,
        sender,
        key,
        alg.as_bytes(),
        apu.as_bytes(),
        apv.as_bytes(),
        true,
    )
    .derive_key(wrap.key_alg(), envelope.tag())?;
    let cek = kek.unwrap_key(enc.key_alg(), &recipient.encrypted_key)?;

    let aad = envelope.combined_aad()?;
    let plaintext = cek.aead_decrypt(envelope.ciphertext(), envelope.iv(), envelope.tag(), &aad)?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alg::KeyAlg;
    use crate::key::LocalKey;

    #[test]
    fn apv_is_order_independent() {
        assert_eq!(apv_for(["b", "a", "c"]), apv_for(["c", "b", "a"]));
        assert_eq!(apv_for(["bob", "alice"]), URL_SAFE_NO_PAD.encode("alice.bob"));
    }

    #[test]
    fn sender_kid_resolution() {
        let mut header = ProtectedHeader::new("ECDH-1PU+A256KW", ContentEncryption::A256CbcHs512);
        assert!(matches!(sender_kid(&header), Err(EnvelopeError::InvalidEnvelope(_))));

        header.skid = Some("alice".into());
        assert_eq!(sender_kid(&header).unwrap(), "alice");

        header.apu = Some(URL_SAFE_NO_PAD.encode("alice"));
        assert_eq!(sender_kid(&header).unwrap(), "alice");

        header.skid = None;
        assert_eq!(sender_kid(&header).unwrap(), "alice");

        header.skid = Some("mallory".into());
        assert_eq!(sender_kid(&header), Err(EnvelopeError::ApuSkidMismatch));
    }

    #[test]
    fn recipients_share_one_epk_in_protected_header() {
        let sender = LocalKey::generate(KeyAlg::X25519).unwrap();
        let mut public = BTreeMap::new();
        for kid in ["b", "a"] {
            public.insert(kid.to_string(), LocalKey::generate(KeyAlg::X25519).unwrap().to_public().unwrap());
        }
        let env = encrypt(&public, "s", &sender, KeyWrap::A256Kw, ContentEncryption::A256CbcHs512, b"x")
            .unwrap();

        assert!(env.protected().epk.is_some());
        assert_eq!(env.protected().skid.as_deref(), Some("s"));
        assert_eq!(env.recipient_kids(), vec!["a", "b"]);
        assert!(env.recipients().iter().all(|r| r.header.epk.is_none()));
    }

    #[test]
    fn gcm_and_xc20p_are_refused() {
        let sender = LocalKey::generate(KeyAlg::X25519).unwrap();
        let mut public = BTreeMap::new();
        public.insert("r".to_string(), LocalKey::generate(KeyAlg::X25519).unwrap());
        for enc in [ContentEncryption::A256Gcm, ContentEncryption::XC20P] {
            assert!(matches!(
                encrypt(&public, "s", &sender, KeyWrap::A256Kw, enc, b"x"),
                Err(EnvelopeError::UnsupportedAlgorithm(_))
            ));
        }
    }

    #[test]
    fn curve_mismatch_with_sender_fails() {
        let sender = LocalKey::generate(KeyAlg::X25519).unwrap();
        let mut public = BTreeMap::new();
        public.insert("r".to_string(), LocalKey::generate(KeyAlg::P256).unwrap());
        assert_eq!(
            encrypt(&public, "s", &sender, KeyWrap::A256Kw, ContentEncryption::A128CbcHs256, b"x")
                .unwrap_err(),
            EnvelopeError::KeyAgreementFailure
        );
    }

    #[test]
    fn wrong_sender_key_fails() {
        let sender = LocalKey::generate(KeyAlg::P256).unwrap();
        let imposter = LocalKey::generate(KeyAlg::P256).unwrap();
        let recip = LocalKey::generate(KeyAlg::P256).unwrap();
        let mut public = BTreeMap::new();
        public.insert("r".to_string(), recip.to_public().unwrap());

        let env = encrypt(&public, "s", &sender, KeyWrap::A128Kw, ContentEncryption::A128CbcHs256, b"x")
            .unwrap();
        let ok = decrypt(&env, "r", &recip, &sender.to_public().unwrap(), KeyWrap::A128Kw, ContentEncryption::A128CbcHs256);
        assert_eq!(ok.unwrap(), b"x");
        assert_eq!(
            decrypt(&env, "r", &recip, &imposter.to_public().unwrap(), KeyWrap::A128Kw, ContentEncryption::A128CbcHs256),
            Err(EnvelopeError::KeyAgreementFailure)
        );
    }
}
