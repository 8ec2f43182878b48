use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use didcomm_envelope::{
    pack, unpack, ContentEncryption, EnvelopeError, EnvelopeKey, InMemoryKeyStore, KeyAlg,
    KeyManagement, LocalKey, ProtectedHeader,
};

struct Fixture {
    alice: LocalKey,
    bob: LocalKey,
    carol: LocalKey,
}

fn setup() -> Fixture {
    Fixture {
        alice: LocalKey::generate(KeyAlg::X25519).unwrap(),
        bob: LocalKey::generate(KeyAlg::X25519).unwrap(),
        carol: LocalKey::generate(KeyAlg::X25519).unwrap(),
    }
}

impl Fixture {
    fn recipients(&self) -> BTreeMap<String, LocalKey> {
        let mut to = BTreeMap::new();
        to.insert("bob".to_string(), self.bob.to_public().unwrap());
        to.insert("carol".to_string(), self.carol.to_public().unwrap());
        to
    }

    fn anoncrypt(&self) -> Vec<u8> {
        pack(&self.recipients(), None, b"attack at dawn").unwrap()
    }

    fn authcrypt(&self) -> Vec<u8> {
        pack(&self.recipients(), Some(("alice", &self.alice)), b"attack at dawn").unwrap()
    }

    fn bob_store(&self) -> InMemoryKeyStore {
        let store = InMemoryKeyStore::new();
        store.insert_local("bob", self.bob.clone()).unwrap();
        store.insert_public("alice", self.alice.clone()).unwrap();
        store
    }
}

fn edit(packed: &[u8], f: impl FnOnce(&mut Value)) -> Vec<u8> {
    let mut value: Value = serde_json::from_slice(packed).unwrap();
    f(&mut value);
    serde_json::to_vec(&value).unwrap()
}

fn flip_bit(value: &mut Value, field: &str, bit: usize) {
    let mut raw = URL_SAFE_NO_PAD.decode(value[field].as_str().unwrap()).unwrap();
    raw[bit / 8] ^= 1 << (bit % 8);
    value[field] = Value::String(URL_SAFE_NO_PAD.encode(raw));
}

/// Decode the protected header, let `f` change it, and re-encode.
fn edit_protected(packed: &[u8], f: impl FnOnce(&mut Value)) -> Vec<u8> {
    edit(packed, |v| {
        let raw = URL_SAFE_NO_PAD.decode(v["protected"].as_str().unwrap()).unwrap();
        let mut header: Value = serde_json::from_slice(&raw).unwrap();
        f(&mut header);
        v["protected"] = Value::String(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()));
    })
}

async fn unpack_err(store: &InMemoryKeyStore, packed: &[u8]) -> EnvelopeError {
    unpack(store, packed).await.unwrap_err()
}

#[tokio::test]
async fn ciphertext_bit_flips_fail() {
    let fx = setup();
    let store = fx.bob_store();
    for packed in [fx.anoncrypt(), fx.authcrypt()] {
        for bit in [0, 7, 13, 100] {
            let tampered = edit(&packed, |v| flip_bit(v, "ciphertext", bit));
            assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
        }
    }
}

#[tokio::test]
async fn tag_bit_flips_fail() {
    let fx = setup();
    let store = fx.bob_store();
    for packed in [fx.anoncrypt(), fx.authcrypt()] {
        for bit in [0, 64, 127] {
            let tampered = edit(&packed, |v| flip_bit(v, "tag", bit));
            assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
        }
    }
}

#[tokio::test]
async fn iv_bit_flip_fails() {
    let fx = setup();
    let store = fx.bob_store();
    for packed in [fx.anoncrypt(), fx.authcrypt()] {
        let tampered = edit(&packed, |v| flip_bit(v, "iv", 3));
        assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
    }
}

#[tokio::test]
async fn protected_header_changes_fail() {
    // a raw bit flip usually breaks the base64/json layer instead, so the
    // header is re-encoded with an extra member: still parses, AAD differs
    let fx = setup();
    let store = fx.bob_store();
    for packed in [fx.anoncrypt(), fx.authcrypt()] {
        let tampered = edit_protected(&packed, |h| h["typ"] = json!("application/didcomm-encrypted+json"));
        assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
    }
}

/// Flip one bit of the decoded protected header, keeping the base64 valid.
fn flip_protected_bit(packed: &[u8], bit: usize) -> (Vec<u8>, Vec<u8>) {
    let mut header = Vec::new();
    let tampered = edit(packed, |v| {
        let mut raw = URL_SAFE_NO_PAD.decode(v["protected"].as_str().unwrap()).unwrap();
        raw[bit / 8] ^= 1 << (bit % 8);
        v["protected"] = Value::String(URL_SAFE_NO_PAD.encode(&raw));
        header = raw;
    });
    (tampered, header)
}

/// A header that still names a supported mode and the same sender.
fn still_acceptable(header: &[u8], original: &ProtectedHeader) -> bool {
    let Ok(parsed) = serde_json::from_slice::<ProtectedHeader>(header) else {
        return false;
    };
    let Ok(management) = parsed.alg.parse::<KeyManagement>() else {
        return false;
    };
    let Ok(enc) = parsed.enc.parse::<ContentEncryption>() else {
        return false;
    };
    if management.is_authenticated() && !enc.allowed_with_1pu() {
        return false;
    }
    parsed.apu == original.apu
        && parsed.skid == original.skid
        && parsed.epk.is_some() == original.epk.is_some()
}

#[tokio::test]
async fn every_protected_header_bit_is_authenticated() {
    let fx = setup();
    let store = fx.bob_store();
    for packed in [fx.anoncrypt(), fx.authcrypt()] {
        let value: Value = serde_json::from_slice(&packed).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(value["protected"].as_str().unwrap()).unwrap();
        let original: ProtectedHeader = serde_json::from_slice(&raw).unwrap();

        let mut reached_decrypt = 0;
        for bit in 0..raw.len() * 8 {
            let (tampered, header) = flip_protected_bit(&packed, bit);
            let err = unpack_err(&store, &tampered).await;
            if still_acceptable(&header, &original) {
                assert_eq!(err, EnvelopeError::KeyAgreementFailure, "bit {bit}");
                reached_decrypt += 1;
            }
        }
        // authcrypt carries free-form values (apv, epk) whose flips reach the unwrap
        if original.skid.is_some() {
            assert!(reached_decrypt > 0);
        }
    }
}

#[tokio::test]
async fn key_wrap_downgrade_fails() {
    let fx = setup();
    let store = fx.bob_store();
    let tampered = edit_protected(&fx.anoncrypt(), |h| h["alg"] = json!("ECDH-ES+A128KW"));
    assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
    let tampered = edit_protected(&fx.authcrypt(), |h| h["alg"] = json!("ECDH-1PU+A128KW"));
    assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
}

#[tokio::test]
async fn encrypted_key_swap_fails() {
    let fx = setup();
    let store = fx.bob_store();
    let tampered = edit(&fx.anoncrypt(), |v| {
        let carol_key = v["recipients"][1]["encrypted_key"].clone();
        v["recipients"][0]["encrypted_key"] = carol_key;
    });
    assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
}

#[tokio::test]
async fn authcrypt_recipient_headers_are_authenticated() {
    let fx = setup();
    let store = fx.bob_store();
    let packed = fx.authcrypt();

    // reordering recipients changes the combined AAD
    let reordered = edit(&packed, |v| {
        v["recipients"].as_array_mut().unwrap().reverse();
    });
    assert_eq!(unpack_err(&store, &reordered).await, EnvelopeError::KeyAgreementFailure);

    // so does adding a member to a header
    let extended = edit(&packed, |v| {
        v["recipients"][1]["header"]["epk"] = json!({"kty": "OKP", "crv": "X25519", "x": "AAAA"});
    });
    assert_eq!(unpack_err(&store, &extended).await, EnvelopeError::KeyAgreementFailure);
}

#[tokio::test]
async fn unsupported_algorithms_are_rejected() {
    let fx = setup();
    let store = fx.bob_store();

    let tampered = edit_protected(&fx.anoncrypt(), |h| h["alg"] = json!("foo"));
    assert!(matches!(
        unpack_err(&store, &tampered).await,
        EnvelopeError::UnsupportedAlgorithm(_)
    ));

    let tampered = edit_protected(&fx.anoncrypt(), |h| h["enc"] = json!("A192GCM"));
    assert!(matches!(
        unpack_err(&store, &tampered).await,
        EnvelopeError::UnsupportedAlgorithm(_)
    ));

    // authcrypt only pairs with the CBC-HMAC modes
    let tampered = edit_protected(&fx.authcrypt(), |h| h["enc"] = json!("A256GCM"));
    assert!(matches!(
        unpack_err(&store, &tampered).await,
        EnvelopeError::UnsupportedAlgorithm(_)
    ));
}

#[tokio::test]
async fn apu_skid_mismatch_is_detected_first() {
    let fx = setup();
    let tampered = edit_protected(&fx.authcrypt(), |h| h["apu"] = json!(URL_SAFE_NO_PAD.encode("mallory")));

    // an empty store: the mismatch must surface before any key lookup
    let empty = InMemoryKeyStore::new();
    assert_eq!(unpack_err(&empty, &tampered).await, EnvelopeError::ApuSkidMismatch);
    assert_eq!(unpack_err(&fx.bob_store(), &tampered).await, EnvelopeError::ApuSkidMismatch);
}

#[tokio::test]
async fn changed_skid_is_caught() {
    let fx = setup();
    let store = fx.bob_store();
    let mallory = LocalKey::generate(KeyAlg::X25519).unwrap();
    store.insert_public("mallory", mallory).unwrap();

    // skid alone changed: apu still says alice
    let tampered = edit_protected(&fx.authcrypt(), |h| h["skid"] = json!("mallory"));
    assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::ApuSkidMismatch);

    // both changed consistently: the wrong static key breaks the unwrap
    let tampered = edit_protected(&fx.authcrypt(), |h| {
        h["skid"] = json!("mallory");
        h["apu"] = json!(URL_SAFE_NO_PAD.encode("mallory"));
    });
    assert_eq!(unpack_err(&store, &tampered).await, EnvelopeError::KeyAgreementFailure);
}

#[tokio::test]
async fn missing_epk_is_invalid() {
    let fx = setup();
    let store = fx.bob_store();
    let tampered = edit(&fx.anoncrypt(), |v| {
        v["recipients"][0]["header"].as_object_mut().unwrap().remove("epk");
    });
    assert!(matches!(
        unpack_err(&store, &tampered).await,
        EnvelopeError::InvalidEnvelope(_)
    ));
}

#[tokio::test]
async fn malformed_input_is_invalid() {
    let store = setup().bob_store();
    for input in [&b""[..], b"{}", b"[]", b"\xff\xfe", br#"{"protected":"!!","iv":"","ciphertext":"","tag":""}"#] {
        assert!(matches!(
            unpack_err(&store, input).await,
            EnvelopeError::InvalidEnvelope(_)
        ));
    }
}

#[tokio::test]
async fn errors_do_not_leak_secrets() {
    let fx = setup();
    let store = fx.bob_store();
    let tampered = edit(&fx.authcrypt(), |v| flip_bit(v, "tag", 0));
    let err = unpack_err(&store, &tampered).await;
    assert_eq!(err.to_string(), "key agreement failed");
    assert!(!format!("{:?}", err).contains("attack"));
}
