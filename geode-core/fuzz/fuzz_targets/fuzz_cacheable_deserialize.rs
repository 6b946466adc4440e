#![no_main]

use libfuzzer_sys::fuzz_target;

use geode_core::serialization::{CacheableValue, Deserializable, ObjectDataInput};

fuzz_target!(|data: &[u8]| {
    let mut input = ObjectDataInput::new(data);
    if let Ok(value) = CacheableValue::deserialize(&mut input) {
        let _ = value.java_hash_code();
        let _ = value.to_string();
    }
    let _ = CacheableValue::from_object_payload(data);
});
