#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use pubcast::{protocol::decode, Payload};

fuzz_target!(|data: &[u8]| {
    // Декодер не должен паниковать ни на каких данных.
    let Ok(message) = decode(Bytes::copy_from_slice(data)) else {
        return;
    };

    assert!(!message.topic.is_empty());
    assert!(!message
        .topic
        .bytes()
        .any(|b| b.is_ascii_whitespace() || b == 0x0b));

    // Bulk-данные это хвост исходного фрейма.
    if let Payload::Bulk(bulk) = &message.payload {
        assert!(data.ends_with(&bulk.data));
    }
});
