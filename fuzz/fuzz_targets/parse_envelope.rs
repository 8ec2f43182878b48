#![no_main]

use didcomm_envelope::{inspect, JweEnvelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = JweEnvelope::from_json(data) else {
        let _ = inspect(data);
        return;
    };

    // anything that parses must serialize and parse back to the same envelope
    let json = envelope.to_json().expect("serialize parsed envelope");
    let again = JweEnvelope::from_json(&json).expect("reparse own output");
    assert_eq!(again.protected_bytes(), envelope.protected_bytes());
    assert_eq!(again.recipients(), envelope.recipients());
    let _ = envelope.combined_aad();
});
