//! Envelope model (JWE JSON serialization)
//!
//! General form:
//!   { "protected": b64u(header), "recipients": [{ "encrypted_key", "header" }],
//!     "iv", "ciphertext", "tag" }
//!
//! Flattened form (one recipient):
//!   { "protected", "header", "encrypted_key", "iv", "ciphertext", "tag" }
//!
//! AAD:
//!   ECDH-ES  = protected
//!   ECDH-1PU = protected || '.' || b64u(json([header, ...]))   (envelope order)
//!
//! `protected` is kept exactly as it appeared on the wire; it is never
//! re-serialized once parsed.

use core::fmt;
use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::alg::ContentEncryption;
use crate::error::{invalid, EnvelopeError};
use crate::jwk::Jwk;

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Integrity-protected header. Field order is the serialization order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub alg: String,
    pub enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
}

impl ProtectedHeader {
    pub fn new(alg: impl Into<String>, enc: ContentEncryption) -> Self {
        Self {
            alg: alg.into(),
            enc: enc.as_str().to_string(),
            apu: None,
            apv: None,
            epk: None,
            skid: None,
        }
    }
}

/// Per-recipient unprotected header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientHeader {
    pub kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,
}

impl RecipientHeader {
    pub fn kid(kid: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            epk: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JweRecipient {
    pub encrypted_key: Vec<u8>,
    pub header: RecipientHeader,
}

/// Which JSON serialization an envelope arrived in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Serialization {
    General,
    Flattened,
}

impl fmt::Display for Serialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serialization::General => f.write_str("general"),
            Serialization::Flattened => f.write_str("flattened"),
        }
    }
}

/// `protected || '.' || b64u(json(headers))`, the ECDH-1PU content AAD.
pub fn combined_aad(protected: &[u8], headers: &[RecipientHeader]) -> Result<Vec<u8>, EnvelopeError> {
    let json = serde_json::to_vec(headers).map_err(|e| invalid(format!("recipient headers: {e}")))?;
    let mut aad = Vec::with_capacity(protected.len() + 1 + json.len() * 4 / 3 + 4);
    aad.extend_from_slice(protected);
    aad.push(b'.');
    aad.extend_from_slice(URL_SAFE_NO_PAD.encode(json).as_bytes());
    Ok(aad)
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct WireRecipient {
    encrypted_key: String,
    header: RecipientHeader,
}

#[derive(Deserialize)]
struct WireEnvelope {
    protected: String,
    #[serde(default)]
    recipients: Option<Vec<WireRecipient>>,
    #[serde(default)]
    header: Option<RecipientHeader>,
    #[serde(default)]
    encrypted_key: Option<String>,
    iv: String,
    ciphertext: String,
    tag: String,
}

#[derive(Serialize)]
struct GeneralOut<'a> {
    protected: &'a str,
    recipients: Vec<WireRecipient>,
    iv: String,
    ciphertext: String,
    tag: String,
}

#[derive(Serialize)]
struct FlattenedOut<'a> {
    protected: &'a str,
    header: &'a RecipientHeader,
    encrypted_key: String,
    iv: String,
    ciphertext: String,
    tag: String,
}

fn b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn unb64(field: &str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| invalid(format!("{field} is not base64url")))
}

// ---------------------------------------------------------------------------
// Parsed envelope (read-only)
// ---------------------------------------------------------------------------

/// A validated envelope. Produced by [`JweEnvelope::from_json`] or
/// [`EnvelopeBuilder::build`]; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JweEnvelope {
    protected: ProtectedHeader,
    protected_b64: String,
    recipients: Vec<JweRecipient>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    serialization: Serialization,
}

impl JweEnvelope {
    /// Parse and validate wire bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("envelope json: {e}")))?;

        let header_json = unb64("protected", &wire.protected)?;
        let protected: ProtectedHeader = serde_json::from_slice(&header_json)
            .map_err(|e| invalid(format!("protected header: {e}")))?;

        let (recipients, serialization) = match (wire.recipients, wire.header, wire.encrypted_key) {
            (Some(list), None, None) => {
                let recipients = list
                    .into_iter()
                    .map(|r| {
                        Ok(JweRecipient {
                            encrypted_key: unb64("encrypted_key", &r.encrypted_key)?,
                            header: r.header,
                        })
                    })
                    .collect::<Result<Vec<_>, EnvelopeError>>()?;
                (recipients, Serialization::General)
            }
            (None, Some(header), Some(encrypted_key)) => (
                vec![JweRecipient {
                    encrypted_key: unb64("encrypted_key", &encrypted_key)?,
                    header,
                }],
                Serialization::Flattened,
            ),
            (None, _, _) => return Err(invalid("no recipients")),
            (Some(_), _, _) => return Err(invalid("mixed general and flattened members")),
        };
        check_recipients(&recipients)?;

        Ok(Self {
            protected,
            protected_b64: wire.protected,
            recipients,
            iv: unb64("iv", &wire.iv)?,
            ciphertext: unb64("ciphertext", &wire.ciphertext)?,
            tag: unb64("tag", &wire.tag)?,
            serialization,
        })
    }

    /// General JSON serialization.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        let out = GeneralOut {
            protected: &self.protected_b64,
            recipients: self
                .recipients
                .iter()
                .map(|r| WireRecipient {
                    encrypted_key: b64(&r.encrypted_key),
                    header: r.header.clone(),
                })
                .collect(),
            iv: b64(&self.iv),
            ciphertext: b64(&self.ciphertext),
            tag: b64(&self.tag),
        };
        serde_json::to_vec(&out).map_err(|e| invalid(format!("serialize: {e}")))
    }

    /// Flattened JSON serialization; only defined for a single recipient.
    pub fn to_json_flattened(&self) -> Result<Vec<u8>, EnvelopeError> {
        let [recipient] = self.recipients.as_slice() else {
            return Err(invalid(format!(
                "flattened form needs exactly one recipient, have {}",
                self.recipients.len()
            )));
        };
        let out = FlattenedOut {
            protected: &self.protected_b64,
            header: &recipient.header,
            encrypted_key: b64(&recipient.encrypted_key),
            iv: b64(&self.iv),
            ciphertext: b64(&self.ciphertext),
            tag: b64(&self.tag),
        };
        serde_json::to_vec(&out).map_err(|e| invalid(format!("serialize: {e}")))
    }

    pub fn protected(&self) -> &ProtectedHeader {
        &self.protected
    }

    /// The protected header exactly as encoded on the wire.
    pub fn protected_bytes(&self) -> &[u8] {
        self.protected_b64.as_bytes()
    }

    pub fn recipients(&self) -> &[JweRecipient] {
        &self.recipients
    }

    pub fn get_recipient(&self, kid: &str) -> Option<&JweRecipient> {
        self.recipients.iter().find(|r| r.header.kid == kid)
    }

    pub fn recipient_kids(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.header.kid.clone()).collect()
    }

    /// ECDH-1PU AAD over every recipient header, in envelope order.
    pub fn combined_aad(&self) -> Result<Vec<u8>, EnvelopeError> {
        let headers: Vec<RecipientHeader> =
            self.recipients.iter().map(|r| r.header.clone()).collect();
        combined_aad(self.protected_bytes(), &headers)
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn serialization(&self) -> Serialization {
        self.serialization
    }
}

fn check_recipients(recipients: &[JweRecipient]) -> Result<(), EnvelopeError> {
    if recipients.is_empty() {
        return Err(invalid("empty recipient list"));
    }
    let mut seen = HashSet::with_capacity(recipients.len());
    for r in recipients {
        if r.header.kid.is_empty() {
            return Err(invalid("recipient without kid"));
        }
        if !seen.insert(r.header.kid.as_str()) {
            return Err(invalid(format!("duplicate recipient kid {}", r.header.kid)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder (write-only)
// ---------------------------------------------------------------------------

/// Assembles an outbound envelope. The protected header is encoded once, on
/// `set_protected`, and those exact bytes are what the AAD and the wire see.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    protected: Option<(ProtectedHeader, String)>,
    recipients: Vec<JweRecipient>,
    payload: Option<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_protected(&mut self, header: ProtectedHeader) -> Result<&mut Self, EnvelopeError> {
        let json =
            serde_json::to_vec(&header).map_err(|e| invalid(format!("protected header: {e}")))?;
        self.protected = Some((header, b64(&json)));
        Ok(self)
    }

    /// Encoded protected header; the ECDH-ES content AAD.
    pub fn protected_bytes(&self) -> Result<&[u8], EnvelopeError> {
        self.protected
            .as_ref()
            .map(|(_, encoded)| encoded.as_bytes())
            .ok_or_else(|| invalid("protected header not set"))
    }

    pub fn add_recipient(&mut self, recipient: JweRecipient) -> Result<&mut Self, EnvelopeError> {
        if self
            .recipients
            .iter()
            .any(|r| r.header.kid == recipient.header.kid)
        {
            return Err(invalid(format!(
                "duplicate recipient kid {}",
                recipient.header.kid
            )));
        }
        self.recipients.push(recipient);
        Ok(self)
    }

    pub fn set_payload(&mut self, ciphertext: Vec<u8>, iv: Vec<u8>, tag: Vec<u8>) -> &mut Self {
        self.payload = Some((ciphertext, iv, tag));
        self
    }

    pub fn build(self) -> Result<JweEnvelope, EnvelopeError> {
        let (protected, protected_b64) = self
            .protected
            .ok_or_else(|| invalid("protected header not set"))?;
        let (ciphertext, iv, tag) = self.payload.ok_or_else(|| invalid("payload not set"))?;
        check_recipients(&self.recipients)?;
        Ok(JweEnvelope {
            protected,
            protected_b64,
            recipients: self.recipients,
            iv,
            ciphertext,
            tag,
            serialization: Serialization::General,
        })
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Envelope metadata, read without any key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvelopeInfo {
    pub alg: String,
    pub enc: String,
    pub serialization: Serialization,
    pub recipients: Vec<String>,
    /// `skid`, or `apu` decoded when `skid` is absent.
    pub sender_kid: Option<String>,
    pub ciphertext_bytes: usize,
    pub total_bytes: usize,
}

impl fmt::Display for EnvelopeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} + {} | {} | {} recipient(s) | {} bytes ({} ciphertext)",
            self.alg,
            self.enc,
            self.serialization,
            self.recipients.len(),
            self.total_bytes,
            self.ciphertext_bytes
        )
    }
}

/// Parse an envelope and report what it claims, without decrypting.
pub fn inspect(bytes: &[u8]) -> Result<EnvelopeInfo, EnvelopeError> {
    let envelope = JweEnvelope::from_json(bytes)?;
    let protected = envelope.protected();
    let sender_kid = protected.skid.clone().or_else(|| {
        protected
            .apu
            .as_deref()
            .and_then(|apu| URL_SAFE_NO_PAD.decode(apu).ok())
            .and_then(|raw| String::from_utf8(raw).ok())
    });
    Ok(EnvelopeInfo {
        alg: protected.alg.clone(),
        enc: protected.enc.clone(),
        serialization: envelope.serialization(),
        recipients: envelope.recipient_kids(),
        sender_kid,
        ciphertext_bytes: envelope.ciphertext().len(),
        total_bytes: bytes.len(),
    })
}
