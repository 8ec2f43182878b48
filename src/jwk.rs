//! JSON Web Key encoding for the agreement curves (RFC 7517, RFC 8037).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::alg::KeyAlg;
use crate::error::KeyError;

pub const KTY_OKP: &str = "OKP";
pub const KTY_EC: &str = "EC";
pub const CRV_X25519: &str = "X25519";
pub const CRV_P256: &str = "P-256";

/// A public (or, with `d`, private) JWK.
///
/// Field order is the serialization order inside `epk` headers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

// `d` must never reach logs.
impl core::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Jwk {
    pub fn okp(crv: &str, x: &[u8]) -> Self {
        Self {
            kty: KTY_OKP.into(),
            crv: crv.into(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: None,
            d: None,
        }
    }

    pub fn ec(crv: &str, x: &[u8], y: &[u8]) -> Self {
        Self {
            kty: KTY_EC.into(),
            crv: crv.into(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
            d: None,
        }
    }

    /// Attach the private component.
    pub fn with_d(mut self, d: &[u8]) -> Self {
        self.d = Some(URL_SAFE_NO_PAD.encode(d));
        self
    }

    /// Drop the private component.
    pub fn to_public(&self) -> Self {
        Self {
            d: None,
            ..self.clone()
        }
    }

    /// Key algorithm named by `kty`/`crv`.
    pub fn key_alg(&self) -> Result<KeyAlg, KeyError> {
        match (self.kty.as_str(), self.crv.as_str()) {
            (KTY_OKP, CRV_X25519) => Ok(KeyAlg::X25519),
            (KTY_EC, CRV_P256) => Ok(KeyAlg::P256),
            _ => Err(KeyError::Unsupported),
        }
    }

    pub fn x_bytes(&self) -> Result<Vec<u8>, KeyError> {
        decode_member(&self.x)
    }

    pub fn y_bytes(&self) -> Result<Vec<u8>, KeyError> {
        self.y
            .as_deref()
            .ok_or(KeyError::InvalidKey)
            .and_then(decode_member)
    }

    pub fn d_bytes(&self) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        self.d
            .as_deref()
            .map(|d| decode_member(d).map(Zeroizing::new))
            .transpose()
    }
}

fn decode_member(value: &str) -> Result<Vec<u8>, KeyError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| KeyError::InvalidKey)
}
