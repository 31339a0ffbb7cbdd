#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hyperstream::aead::AeadDecoder;
use hyperstream::key::{derive_aead_key, TopicKey};

// Arbitrary bytes through the decoder state machine: must never panic, and
// must either error or end in a consistent state.
fuzz_target!(|data: &[u8]| {
    let key = derive_aead_key(&TopicKey::parse(
        "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    )
    .unwrap());
    let mut decoder = AeadDecoder::new(&key);
    let mut buf = BytesMut::from(data);
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
});
