#![no_main]

use libfuzzer_sys::fuzz_target;

use hyperstream::archive::extract::sanitized_path;
use hyperstream::archive::{EntryHeader, BLOCK_SIZE};

// Header parsing plus path sanitization over arbitrary blocks: no panics,
// and no accepted name may resolve outside the destination.
fuzz_target!(|data: &[u8]| {
    if data.len() < BLOCK_SIZE {
        return;
    }
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&data[..BLOCK_SIZE]);

    if let Ok(header) = EntryHeader::decode(&block) {
        let dest = std::path::Path::new("/fuzz/dest");
        if let Ok(path) = sanitized_path(dest, &header.name) {
            assert!(path.starts_with(dest));
            assert_ne!(path, dest);
        }
    }
});
