//! # didcomm-envelope
//!
//! Multi-recipient JWE envelopes for agent-to-agent messaging.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use didcomm_envelope::{pack, unpack, EnvelopeKey, InMemoryKeyStore, KeyAlg, LocalKey};
//!
//! # fn main() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let alice = LocalKey::generate(KeyAlg::X25519).unwrap();
//! let bob = LocalKey::generate(KeyAlg::X25519).unwrap();
//!
//! let mut to = BTreeMap::new();
//! to.insert("did:example:bob#key-1".to_string(), bob.to_public().unwrap());
//! let envelope = pack(&to, Some(("did:example:alice#key-1", &alice)), b"hello").unwrap();
//!
//! let store = InMemoryKeyStore::new();
//! store.insert_local("did:example:bob#key-1", bob).unwrap();
//! store.insert_public("did:example:alice#key-1", alice).unwrap();
//!
//! let opened = unpack(&store, &envelope).await.unwrap();
//! assert_eq!(opened.plaintext, b"hello");
//! assert_eq!(opened.sender_kid.as_deref(), Some("did:example:alice#key-1"));
//! # });
//! # }
//! ```
//!
//! ## Modes
//!
//! - **Anoncrypt** (`ECDH-ES+A128KW` / `ECDH-ES+A256KW`): one ephemeral key
//!   per recipient, no sender authentication
//! - **Authcrypt** (`ECDH-1PU+A128KW` / `ECDH-1PU+A256KW`): one shared
//!   ephemeral key plus the sender's static key; the ciphertext tag is bound
//!   into every key wrap
//!
//! ## Errors
//!
//! Every failure is an [`EnvelopeError`]. Agreement, unwrap and AEAD failures
//! all surface as [`EnvelopeError::KeyAgreementFailure`].
//!
//! ## What's NOT Provided
//!
//! - Transport, routing or forwarding
//! - Plaintext (unencrypted) messages
//! - Key lifecycle management beyond a simple keyring

#![deny(unsafe_code)]

pub mod aead;
pub mod agreement;
pub mod alg;
pub mod ecdh_1pu;
pub mod ecdh_es;
pub mod envelope;
pub mod error;
pub mod jwk;
pub mod kdf;
pub mod key;
pub mod packer;
pub mod store;

pub use agreement::{derive_shared_secret, Ecdh1Pu, EcdhEs, KeyAgreement};
pub use alg::{ContentEncryption, KeyAlg, KeyManagement, KeyWrap};
pub use envelope::{
    inspect, EnvelopeBuilder, EnvelopeInfo, JweEnvelope, JweRecipient, ProtectedHeader,
    RecipientHeader, Serialization,
};
pub use error::{EnvelopeError, KeyError, StoreError};
pub use jwk::Jwk;
pub use kdf::{concat_kdf, concat_kdf_tagged, derive_1pu};
pub use key::{EnvelopeKey, LocalKey};
pub use packer::{pack, unpack, PackConfig, Packer, Unpacked};
pub use store::{FileKeyStore, InMemoryKeyStore, KeyStore, Keyring};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
