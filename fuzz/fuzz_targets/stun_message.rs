//! Fuzz target for STUN message decoding
//!
//! The decoder must never panic, and anything it accepts must re-encode into
//! a message that decodes to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use natprobe_stun::StunMessage;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = StunMessage::decode(data) else {
        return;
    };

    let reencoded = message.encode();
    let decoded = StunMessage::decode(&reencoded).expect("re-encoded message must decode");
    assert_eq!(decoded, message);

    let _ = message.mapped_address();
    let _ = message.changed_address();
    let _ = message.error_code();
});
