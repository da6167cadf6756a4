//! Fuzz harness for the web runtime wire parser.
//!
//! Arbitrary bytes must never panic the parser, and anything it accepts must
//! survive a re-encode and parse back to the same message.

#![no_main]
use libfuzzer_sys::fuzz_target;
use sysmgr_core::ipc::{ControlRequest, encode_line, parse_delegate_message};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = parse_delegate_message(data) {
        if let Ok(line) = encode_line(&message) {
            let reparsed = parse_delegate_message(&line).expect("re-encoded message must parse");
            assert_eq!(message, reparsed);
        }
    }

    let _ = ControlRequest::parse(data);
});
