#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use geode_core::protocol::{Part, RawMessage};

fuzz_target!(|data: &[u8]| {
    let _ = RawMessage::parse(Bytes::copy_from_slice(data));

    let mut buf = Bytes::copy_from_slice(data);
    while let Ok(part) = Part::read_from(&mut buf) {
        let _ = part.as_int();
        let _ = part.as_native_int();
        let _ = part.as_string();
        let _ = part.as_object();
        let _ = part.as_bool_object();
        if buf.is_empty() {
            break;
        }
    }
});
