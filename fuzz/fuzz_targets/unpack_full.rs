#![no_main]

use std::collections::BTreeMap;

use didcomm_envelope::{pack, unpack, EnvelopeKey, InMemoryKeyStore, KeyAlg, LocalKey};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

struct Fixture {
    store: InMemoryKeyStore,
    seed: Vec<u8>,
}

static FIXTURE: Lazy<Fixture> = Lazy::new(|| {
    let alice = LocalKey::generate(KeyAlg::X25519).unwrap();
    let bob = LocalKey::generate(KeyAlg::X25519).unwrap();
    let mut to = BTreeMap::new();
    to.insert("bob".to_string(), bob.to_public().unwrap());
    let seed = pack(&to, Some(("alice", &alice)), b"fuzz").unwrap();

    let store = InMemoryKeyStore::new();
    store.insert_local("bob", bob).unwrap();
    store.insert_public("alice", alice).unwrap();
    Fixture { store, seed }
});

fuzz_target!(|data: &[u8]| {
    let fx = &*FIXTURE;
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

    // raw input
    let _ = rt.block_on(unpack(&fx.store, data));

    // the valid envelope with input bytes xor-ed over it
    let mut mutated = fx.seed.clone();
    for (i, b) in data.iter().enumerate() {
        let n = mutated.len();
        mutated[i % n] ^= b;
    }
    if mutated != fx.seed {
        if let Ok(opened) = rt.block_on(unpack(&fx.store, &mutated)) {
            // a change that still opens must not have altered the message
            assert_eq!(opened.plaintext, b"fuzz");
        }
    }
});
