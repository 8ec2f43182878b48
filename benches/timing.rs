use std::collections::BTreeMap;
use std::hint::black_box;
use std::time::Instant;

use didcomm_envelope::{pack, unpack, EnvelopeKey, InMemoryKeyStore, KeyAlg, LocalKey};

fn time_it<F: FnMut()>(label: &str, iters: usize, mut f: F) {
    // warmup
    for _ in 0..(iters / 10).max(10) {
        f();
    }

    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    let elapsed = start.elapsed();

    let per_iter = elapsed / (iters as u32);
    println!("{:<20} total={:?}  per_iter={:?}", label, elapsed, per_iter);
}

fn main() {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

    let alice = LocalKey::generate(KeyAlg::X25519).unwrap();
    let bob = LocalKey::generate(KeyAlg::X25519).unwrap();
    let mut to = BTreeMap::new();
    to.insert("bob".to_string(), bob.to_public().unwrap());

    let store = InMemoryKeyStore::new();
    store.insert_local("bob", bob).unwrap();
    store.insert_public("alice", alice.clone()).unwrap();

    let plaintext = vec![0x42u8; 1024];
    let anon = pack(&to, None, &plaintext).unwrap();
    let auth = pack(&to, Some(("alice", &alice)), &plaintext).unwrap();

    // tag tampered: fails deep in the unwrap for authcrypt, at AEAD for anoncrypt
    let tamper = |packed: &[u8]| {
        let mut v: serde_json::Value = serde_json::from_slice(packed).unwrap();
        let tag = v["tag"].as_str().unwrap();
        let first = if tag.starts_with('A') { "B" } else { "A" };
        v["tag"] = serde_json::Value::String(format!("{first}{}", &tag[1..]));
        serde_json::to_vec(&v).unwrap()
    };
    let anon_tampered = tamper(&anon);
    let auth_tampered = tamper(&auth);

    // Iters: keep reasonable, adjust as needed
    let iters = 2_000;

    time_it("pack_anon", iters, || {
        black_box(pack(&to, None, black_box(&plaintext)).unwrap());
    });

    time_it("pack_auth", iters, || {
        black_box(pack(&to, Some(("alice", &alice)), black_box(&plaintext)).unwrap());
    });

    time_it("unpack_anon", iters, || {
        black_box(rt.block_on(unpack(&store, black_box(&anon))).unwrap());
    });

    time_it("unpack_auth", iters, || {
        black_box(rt.block_on(unpack(&store, black_box(&auth))).unwrap());
    });

    time_it("tampered_anon", iters, || {
        black_box(rt.block_on(unpack(&store, black_box(&anon_tampered))).err());
    });

    time_it("tampered_auth", iters, || {
        black_box(rt.block_on(unpack(&store, black_box(&auth_tampered))).err());
    });

    time_it("garbage", iters, || {
        black_box(rt.block_on(unpack(&store, black_box(b"{\"protected\":1}"))).err());
    });

    println!("\nDone.");
}
