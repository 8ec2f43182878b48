//! Algorithm identifiers.
//!
//! Protected header values:
//!   alg = ECDH-ES+A128KW | ECDH-ES+A256KW | ECDH-1PU+A128KW | ECDH-1PU+A256KW
//!   enc = A128GCM | A256GCM | A128CBC-HS256 | A256CBC-HS512 | XC20P

use core::fmt;
use core::str::FromStr;

use crate::error::EnvelopeError;

// ---------------------------------------------------------------------------
// Key algorithms
// ---------------------------------------------------------------------------

/// Algorithm of a [`Key`](crate::key::EnvelopeKey).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyAlg {
    X25519,
    P256,
    A128Kw,
    A256Kw,
    A128Gcm,
    A256Gcm,
    A128CbcHs256,
    A256CbcHs512,
    XC20P,
}

impl KeyAlg {
    /// Whether keys of this algorithm take part in ECDH.
    pub fn is_agreement(&self) -> bool {
        matches!(self, KeyAlg::X25519 | KeyAlg::P256)
    }

    /// Symmetric key length in bytes (0 for agreement keys).
    pub fn key_len(&self) -> usize {
        match self {
            KeyAlg::X25519 | KeyAlg::P256 => 0,
            KeyAlg::A128Kw | KeyAlg::A128Gcm => 16,
            KeyAlg::A256Kw | KeyAlg::A256Gcm | KeyAlg::A128CbcHs256 | KeyAlg::XC20P => 32,
            KeyAlg::A256CbcHs512 => 64,
        }
    }
}

impl fmt::Display for KeyAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyAlg::X25519 => "x25519",
            KeyAlg::P256 => "p256",
            KeyAlg::A128Kw => "a128kw",
            KeyAlg::A256Kw => "a256kw",
            KeyAlg::A128Gcm => "a128gcm",
            KeyAlg::A256Gcm => "a256gcm",
            KeyAlg::A128CbcHs256 => "a128cbchs256",
            KeyAlg::A256CbcHs512 => "a256cbchs512",
            KeyAlg::XC20P => "xc20p",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Key wrapping (the "+A*KW" half of `alg`)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KeyWrap {
    A128Kw,
    #[default]
    A256Kw,
}

impl KeyWrap {
    pub fn key_alg(&self) -> KeyAlg {
        match self {
            KeyWrap::A128Kw => KeyAlg::A128Kw,
            KeyWrap::A256Kw => KeyAlg::A256Kw,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyWrap::A128Kw => "A128KW",
            KeyWrap::A256Kw => "A256KW",
        }
    }
}

impl FromStr for KeyWrap {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A128KW" => Ok(KeyWrap::A128Kw),
            "A256KW" => Ok(KeyWrap::A256Kw),
            other => Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Key management (`alg`)
// ---------------------------------------------------------------------------

/// The closed set of key-management families, classified once from `alg`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyManagement {
    /// Anonymous encryption, one ephemeral key per recipient.
    EcdhEs(KeyWrap),
    /// Sender-authenticated encryption, one shared ephemeral key.
    Ecdh1Pu(KeyWrap),
}

pub const ECDH_ES: &str = "ECDH-ES";
pub const ECDH_1PU: &str = "ECDH-1PU";

impl KeyManagement {
    pub fn key_wrap(&self) -> KeyWrap {
        match self {
            KeyManagement::EcdhEs(w) | KeyManagement::Ecdh1Pu(w) => *w,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, KeyManagement::Ecdh1Pu(_))
    }

    /// Header value, e.g. `ECDH-1PU+A256KW`.
    pub fn header_value(&self) -> String {
        match self {
            KeyManagement::EcdhEs(w) => format!("{}+{}", ECDH_ES, w.as_str()),
            KeyManagement::Ecdh1Pu(w) => format!("{}+{}", ECDH_1PU, w.as_str()),
        }
    }
}

impl FromStr for KeyManagement {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || EnvelopeError::UnsupportedAlgorithm(s.to_string());
        let (family, wrap) = s.split_once('+').ok_or_else(unsupported)?;
        let wrap: KeyWrap = wrap.parse().map_err(|_| unsupported())?;
        match family {
            ECDH_1PU => Ok(KeyManagement::Ecdh1Pu(wrap)),
            ECDH_ES => Ok(KeyManagement::EcdhEs(wrap)),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for KeyManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

// ---------------------------------------------------------------------------
// Content encryption (`enc`)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentEncryption {
    A128Gcm,
    A256Gcm,
    A128CbcHs256,
    A256CbcHs512,
    XC20P,
}

impl ContentEncryption {
    pub fn key_alg(&self) -> KeyAlg {
        match self {
            ContentEncryption::A128Gcm => KeyAlg::A128Gcm,
            ContentEncryption::A256Gcm => KeyAlg::A256Gcm,
            ContentEncryption::A128CbcHs256 => KeyAlg::A128CbcHs256,
            ContentEncryption::A256CbcHs512 => KeyAlg::A256CbcHs512,
            ContentEncryption::XC20P => KeyAlg::XC20P,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncryption::A128Gcm => "A128GCM",
            ContentEncryption::A256Gcm => "A256GCM",
            ContentEncryption::A128CbcHs256 => "A128CBC-HS256",
            ContentEncryption::A256CbcHs512 => "A256CBC-HS512",
            ContentEncryption::XC20P => "XC20P",
        }
    }

    /// ECDH-1PU binds the tag into key wrapping, which needs a
    /// key-committing tag: only the CBC-HMAC modes qualify.
    pub fn allowed_with_1pu(&self) -> bool {
        matches!(
            self,
            ContentEncryption::A128CbcHs256 | ContentEncryption::A256CbcHs512
        )
    }
}

impl FromStr for ContentEncryption {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A128GCM" => Ok(ContentEncryption::A128Gcm),
            "A256GCM" => Ok(ContentEncryption::A256Gcm),
            "A128CBC-HS256" => Ok(ContentEncryption::A128CbcHs256),
            "A256CBC-HS512" => Ok(ContentEncryption::A256CbcHs512),
            "XC20P" => Ok(ContentEncryption::XC20P),
            other => Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for ContentEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_alg_values() {
        for (s, want) in [
            ("ECDH-ES+A128KW", KeyManagement::EcdhEs(KeyWrap::A128Kw)),
            ("ECDH-ES+A256KW", KeyManagement::EcdhEs(KeyWrap::A256Kw)),
            ("ECDH-1PU+A128KW", KeyManagement::Ecdh1Pu(KeyWrap::A128Kw)),
            ("ECDH-1PU+A256KW", KeyManagement::Ecdh1Pu(KeyWrap::A256Kw)),
        ] {
            let got: KeyManagement = s.parse().unwrap();
            assert_eq!(got, want);
            assert_eq!(got.header_value(), s);
        }
    }

    #[test]
    fn rejects_unknown_alg_values() {
        for s in ["foo", "ECDH-ES", "ECDH-ES+A192KW", "RSA-OAEP", "ECDH-1PU+", ""] {
            assert!(matches!(
                s.parse::<KeyManagement>(),
                Err(EnvelopeError::UnsupportedAlgorithm(_))
            ));
        }
    }

    #[test]
    fn enc_names_round_trip() {
        for enc in [
            ContentEncryption::A128Gcm,
            ContentEncryption::A256Gcm,
            ContentEncryption::A128CbcHs256,
            ContentEncryption::A256CbcHs512,
            ContentEncryption::XC20P,
        ] {
            assert_eq!(enc.as_str().parse::<ContentEncryption>().unwrap(), enc);
        }
        assert!("A192GCM".parse::<ContentEncryption>().is_err());
    }
}
