//! Key capability: the provider seam between envelope logic and primitives.
//!
//! Envelope code only ever talks to [`EnvelopeKey`]. [`LocalKey`] is the
//! in-process backend (X25519, P-256, AES-KW, AEAD content keys).
//!
//! Serialization:
//!   X25519 public = u[32]            secret = k[32]
//!   P-256  public = SEC1 point       secret = scalar[32]
//!   symmetric     = raw key bytes (length fixed by `KeyAlg`)

use aes_kw::{KekAes128, KekAes256};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes};
use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::aead::{self, Encrypted};
use crate::alg::KeyAlg;
use crate::error::KeyError;
use crate::jwk::{Jwk, CRV_P256, CRV_X25519};

pub const X25519_KEY_BYTES: usize = 32;
pub const P256_COORD_BYTES: usize = 32;

/// Shared secret from one ECDH exchange.
pub type SharedSecret = Zeroizing<Vec<u8>>;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// An opaque key handle.
///
/// Implementors decide where the material lives. Nothing in the packing
/// engines assumes a particular backend.
pub trait EnvelopeKey: Sized + Send + Sync {
    /// Fresh random key.
    fn generate(alg: KeyAlg) -> Result<Self, KeyError>;

    /// Fresh random key flagged as single-use.
    fn generate_ephemeral(alg: KeyAlg) -> Result<Self, KeyError>;

    /// Key from secret bytes (agreement secret or symmetric material).
    fn from_secret_bytes(alg: KeyAlg, secret: &[u8]) -> Result<Self, KeyError>;

    /// Public-only agreement key.
    fn from_public_bytes(alg: KeyAlg, public: &[u8]) -> Result<Self, KeyError>;

    /// Agreement key from a JWK; private when `d` is present.
    fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError>;

    fn algorithm(&self) -> KeyAlg;

    fn is_ephemeral(&self) -> bool;

    fn to_public_bytes(&self) -> Result<Vec<u8>, KeyError>;

    fn to_jwk_public(&self) -> Result<Jwk, KeyError>;

    /// Raw ECDH: `self` must hold a secret, `other` a public key on the same curve.
    fn key_exchange(&self, other: &Self) -> Result<SharedSecret, KeyError>;

    fn aead_encrypt(&self, message: &[u8], aad: &[u8]) -> Result<Encrypted, KeyError>;

    fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, KeyError>;

    /// Wrap `other`'s symmetric material with this key-wrapping key.
    fn wrap_key(&self, other: &Self) -> Result<Vec<u8>, KeyError>;

    /// Unwrap a symmetric key of algorithm `alg`.
    fn unwrap_key(&self, alg: KeyAlg, wrapped: &[u8]) -> Result<Self, KeyError>;
}

// ---------------------------------------------------------------------------
// Local backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum KeyMaterial {
    X25519 {
        public: X25519PublicKey,
        secret: Option<StaticSecret>,
    },
    P256 {
        public: p256::PublicKey,
        secret: Option<p256::SecretKey>,
    },
    Symmetric {
        alg: KeyAlg,
        bytes: Zeroizing<Vec<u8>>,
    },
}

/// In-process key backed by RustCrypto / dalek primitives.
#[derive(Clone)]
pub struct LocalKey {
    material: KeyMaterial,
    ephemeral: bool,
}

impl core::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalKey")
            .field("alg", &self.algorithm())
            .field("ephemeral", &self.ephemeral)
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

impl LocalKey {
    fn new(material: KeyMaterial) -> Self {
        Self {
            material,
            ephemeral: false,
        }
    }

    /// Whether this handle can perform private operations.
    pub fn has_secret(&self) -> bool {
        match &self.material {
            KeyMaterial::X25519 { secret, .. } => secret.is_some(),
            KeyMaterial::P256 { secret, .. } => secret.is_some(),
            KeyMaterial::Symmetric { .. } => true,
        }
    }

    /// Public-only copy of an agreement key.
    pub fn to_public(&self) -> Result<Self, KeyError> {
        let material = match &self.material {
            KeyMaterial::X25519 { public, .. } => KeyMaterial::X25519 {
                public: *public,
                secret: None,
            },
            KeyMaterial::P256 { public, .. } => KeyMaterial::P256 {
                public: public.clone(),
                secret: None,
            },
            KeyMaterial::Symmetric { .. } => return Err(KeyError::Unsupported),
        };
        Ok(Self::new(material))
    }

    /// Private JWK (with `d`), for keyring persistence.
    pub fn to_jwk_secret(&self) -> Result<Jwk, KeyError> {
        let public = self.to_jwk_public()?;
        match &self.material {
            KeyMaterial::X25519 {
                secret: Some(sk), ..
            } => Ok(public.with_d(Zeroizing::new(sk.to_bytes()).as_slice())),
            KeyMaterial::P256 {
                secret: Some(sk), ..
            } => Ok(public.with_d(Zeroizing::new(sk.to_bytes().to_vec()).as_slice())),
            _ => Err(KeyError::InvalidKey),
        }
    }

    fn symmetric(&self) -> Result<(KeyAlg, &[u8]), KeyError> {
        match &self.material {
            KeyMaterial::Symmetric { alg, bytes } => Ok((*alg, bytes.as_slice())),
            _ => Err(KeyError::Unsupported),
        }
    }

    fn random_symmetric(alg: KeyAlg) -> Result<Self, KeyError> {
        let mut bytes = Zeroizing::new(vec![0u8; alg.key_len()]);
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| KeyError::Random)?;
        Ok(Self::new(KeyMaterial::Symmetric { alg, bytes }))
    }
}

fn p256_public_from_coords(x: &[u8], y: &[u8]) -> Result<p256::PublicKey, KeyError> {
    if x.len() != P256_COORD_BYTES || y.len() != P256_COORD_BYTES {
        return Err(KeyError::InvalidKey);
    }
    let point = EncodedPoint::from_affine_coordinates(
        FieldBytes::from_slice(x),
        FieldBytes::from_slice(y),
        false,
    );
    Option::from(p256::PublicKey::from_encoded_point(&point)).ok_or(KeyError::InvalidKey)
}

fn x25519_bytes(bytes: &[u8]) -> Result<[u8; X25519_KEY_BYTES], KeyError> {
    bytes.try_into().map_err(|_| KeyError::InvalidKey)
}

fn kek_bytes<const N: usize>(kek: &[u8]) -> Result<[u8; N], KeyError> {
    kek.try_into().map_err(|_| KeyError::InvalidKey)
}

impl EnvelopeKey for LocalKey {
    fn generate(alg: KeyAlg) -> Result<Self, KeyError> {
        let material = match alg {
            KeyAlg::X25519 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                KeyMaterial::X25519 {
                    public: X25519PublicKey::from(&secret),
                    secret: Some(secret),
                }
            }
            KeyAlg::P256 => {
                let secret = p256::SecretKey::random(&mut OsRng);
                KeyMaterial::P256 {
                    public: secret.public_key(),
                    secret: Some(secret),
                }
            }
            _ => return Self::random_symmetric(alg),
        };
        Ok(Self::new(material))
    }

    fn generate_ephemeral(alg: KeyAlg) -> Result<Self, KeyError> {
        let mut key = Self::generate(alg)?;
        key.ephemeral = true;
        Ok(key)
    }

    fn from_secret_bytes(alg: KeyAlg, secret: &[u8]) -> Result<Self, KeyError> {
        let material = match alg {
            KeyAlg::X25519 => {
                let secret = StaticSecret::from(x25519_bytes(secret)?);
                KeyMaterial::X25519 {
                    public: X25519PublicKey::from(&secret),
                    secret: Some(secret),
                }
            }
            KeyAlg::P256 => {
                if secret.len() != P256_COORD_BYTES {
                    return Err(KeyError::InvalidKey);
                }
                let secret =
                    p256::SecretKey::from_slice(secret).map_err(|_| KeyError::InvalidKey)?;
                KeyMaterial::P256 {
                    public: secret.public_key(),
                    secret: Some(secret),
                }
            }
            _ => {
                if secret.len() != alg.key_len() {
                    return Err(KeyError::InvalidKey);
                }
                KeyMaterial::Symmetric {
                    alg,
                    bytes: Zeroizing::new(secret.to_vec()),
                }
            }
        };
        Ok(Self::new(material))
    }

    fn from_public_bytes(alg: KeyAlg, public: &[u8]) -> Result<Self, KeyError> {
        let material = match alg {
            KeyAlg::X25519 => KeyMaterial::X25519 {
                public: X25519PublicKey::from(x25519_bytes(public)?),
                secret: None,
            },
            KeyAlg::P256 => KeyMaterial::P256 {
                public: p256::PublicKey::from_sec1_bytes(public)
                    .map_err(|_| KeyError::InvalidKey)?,
                secret: None,
            },
            _ => return Err(KeyError::Unsupported),
        };
        Ok(Self::new(material))
    }

    fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let alg = jwk.key_alg()?;
        let key = match jwk.d_bytes()? {
            Some(d) => Self::from_secret_bytes(alg, &d)?,
            None => match alg {
                KeyAlg::X25519 => Self::from_public_bytes(alg, &jwk.x_bytes()?)?,
                _ => Self::new(KeyMaterial::P256 {
                    public: p256_public_from_coords(&jwk.x_bytes()?, &jwk.y_bytes()?)?,
                    secret: None,
                }),
            },
        };
        // a private JWK must describe the same public key it carries
        if key.to_jwk_public()? != jwk.to_public() {
            return Err(KeyError::InvalidKey);
        }
        Ok(key)
    }

    fn algorithm(&self) -> KeyAlg {
        match &self.material {
            KeyMaterial::X25519 { .. } => KeyAlg::X25519,
            KeyMaterial::P256 { .. } => KeyAlg::P256,
            KeyMaterial::Symmetric { alg, .. } => *alg,
        }
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn to_public_bytes(&self) -> Result<Vec<u8>, KeyError> {
        match &self.material {
            KeyMaterial::X25519 { public, .. } => Ok(public.as_bytes().to_vec()),
            KeyMaterial::P256 { public, .. } => {
                Ok(public.to_encoded_point(false).as_bytes().to_vec())
            }
            KeyMaterial::Symmetric { .. } => Err(KeyError::Unsupported),
        }
    }

    fn to_jwk_public(&self) -> Result<Jwk, KeyError> {
        match &self.material {
            KeyMaterial::X25519 { public, .. } => Ok(Jwk::okp(CRV_X25519, public.as_bytes())),
            KeyMaterial::P256 { public, .. } => {
                let point = public.to_encoded_point(false);
                let x = point.x().ok_or(KeyError::InvalidKey)?;
                let y = point.y().ok_or(KeyError::InvalidKey)?;
                Ok(Jwk::ec(CRV_P256, x, y))
            }
            KeyMaterial::Symmetric { .. } => Err(KeyError::Unsupported),
        }
    }

    fn key_exchange(&self, other: &Self) -> Result<SharedSecret, KeyError> {
        match (&self.material, &other.material) {
            (
                KeyMaterial::X25519 {
                    secret: Some(sk), ..
                },
                KeyMaterial::X25519 { public, .. },
            ) => {
                let shared = sk.diffie_hellman(public);
                // reject low-order points
                if !shared.was_contributory() {
                    return Err(KeyError::InvalidKey);
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            (
                KeyMaterial::P256 {
                    secret: Some(sk), ..
                },
                KeyMaterial::P256 { public, .. },
            ) => {
                let shared =
                    p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), public.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            (KeyMaterial::X25519 { secret: None, .. }, KeyMaterial::X25519 { .. })
            | (KeyMaterial::P256 { secret: None, .. }, KeyMaterial::P256 { .. }) => {
                Err(KeyError::InvalidKey)
            }
            _ => Err(KeyError::Incompatible),
        }
    }

    fn aead_encrypt(&self, message: &[u8], aad: &[u8]) -> Result<Encrypted, KeyError> {
        let (alg, key) = self.symmetric()?;
        aead::encrypt(alg, key, message, aad)
    }

    fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, KeyError> {
        let (alg, key) = self.symmetric()?;
        aead::decrypt(alg, key, ciphertext, nonce, tag, aad)
    }

    fn wrap_key(&self, other: &Self) -> Result<Vec<u8>, KeyError> {
        let (alg, kek) = self.symmetric()?;
        let (_, cek) = other.symmetric()?;
        let wrapped = match alg {
            KeyAlg::A128Kw => KekAes128::from(kek_bytes::<16>(kek)?).wrap_vec(cek),
            KeyAlg::A256Kw => KekAes256::from(kek_bytes::<32>(kek)?).wrap_vec(cek),
            _ => return Err(KeyError::Unsupported),
        };
        wrapped.map_err(|_| KeyError::Encryption)
    }

    fn unwrap_key(&self, alg: KeyAlg, wrapped: &[u8]) -> Result<Self, KeyError> {
        let (kw_alg, kek) = self.symmetric()?;
        let cek = match kw_alg {
            KeyAlg::A128Kw => KekAes128::from(kek_bytes::<16>(kek)?).unwrap_vec(wrapped),
            KeyAlg::A256Kw => KekAes256::from(kek_bytes::<32>(kek)?).unwrap_vec(wrapped),
            _ => return Err(KeyError::Unsupported),
        };
        let cek = Zeroizing::new(cek.map_err(|_| KeyError::Decryption)?);
        if alg.is_agreement() || cek.len() != alg.key_len() {
            return Err(KeyError::Decryption);
        }
        Self::from_secret_bytes(alg, &cek)
    }
}
