#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use hyperstream::transfer::preamble::split_line;

// The preamble splitter sees raw socket bytes before any authentication;
// arbitrary input must parse, wait, or error — never panic.
fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    let _ = split_line(&mut buf);
});
