#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pubcast::{
    protocol::{decode, encode_bulk},
    Payload,
};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    topic: String,
    pub_id: u32,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    // Публикатор не пропускает такие имена, кодек их не проверяет.
    if input.topic.is_empty() || input.topic.chars().any(char::is_whitespace) {
        return;
    }

    let message = decode(encode_bulk(&input.topic, input.pub_id, &input.data))
        .unwrap_or_else(|e| panic!("bulk frame for {input:?} failed to decode: {e}"));

    match message.payload {
        Payload::Bulk(bulk) => {
            assert_eq!(bulk.pub_id, input.pub_id);
            assert_eq!(bulk.data.as_ref(), input.data.as_slice());
        }
        Payload::Event(_) => panic!("bulk frame decoded as event: {input:?}"),
    }
});
