#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use geode_core::protocol::{decode_reply, ChunkCodec, MessageCodec, MessageType};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };

    let mut buf = BytesMut::from(rest);
    let mut codec = MessageCodec::new();
    while let Ok(Some(message)) = codec.decode(&mut buf) {
        let request = MessageType::try_from(selector as i32).unwrap_or(MessageType::Request);
        let _ = decode_reply(request, &message);
        let _ = decode_reply(MessageType::ClientNotification, &message);
    }

    let mut buf = BytesMut::from(rest);
    let mut chunks = ChunkCodec::new();
    while let Ok(Some(chunk)) = chunks.decode(&mut buf) {
        let _ = chunk.parts();
        if chunk.is_last() {
            break;
        }
    }
});
