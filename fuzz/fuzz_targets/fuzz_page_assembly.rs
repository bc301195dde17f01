//! Fuzz target for page splitting and assembly.
//!
//! Splitting any payload into pages and assembling them again must return the
//! payload, and assembling arbitrary bytes must fail cleanly rather than panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use simpledb_store::{
    HEADER_SIZE,
    codec::page::{PageLayout, assemble_pages, write_pages},
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let page_size = usize::from(u16::from_le_bytes([data[0], data[1]])).max(1);
    let layout = if data[2] & 1 == 0 { PageLayout::Versioned } else { PageLayout::Legacy };
    let payload = &data[3..];

    let mut image = vec![0u8; HEADER_SIZE];
    let count = write_pages(&mut image, payload, page_size, layout);
    let joined =
        assemble_pages(&image, count as i32, layout, "fuzz").expect("assemble written pages");
    assert_eq!(joined, payload);

    // Raw input as an image: any outcome but a panic is acceptable.
    let mut raw = vec![0u8; HEADER_SIZE];
    raw.extend_from_slice(payload);
    let _ = assemble_pages(&raw, i32::from(data[2]), layout, "fuzz");
});
