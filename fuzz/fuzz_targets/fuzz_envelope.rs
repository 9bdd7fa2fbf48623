//! Fuzz target: `Envelope::parse` on inbound frames
//!
//! Feeds arbitrary bytes through the same path a peer frame takes: into a
//! `Message` (truncating at capacity) and then the envelope parser.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - Anything that parses re-serialises into a frame that parses again
//! - `is_heartbeat` agrees with the parsed `type`
//!
//! cargo fuzz run fuzz_envelope

#![no_main]

use bootbone::link::envelope::is_heartbeat;
use bootbone::link::{Envelope, MAX_MESSAGE_LEN, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let msg = Message::new(data);
    assert!(msg.len() <= MAX_MESSAGE_LEN);

    let Ok(env) = Envelope::parse(&msg) else {
        assert!(!is_heartbeat(&msg));
        return;
    };
    assert_eq!(is_heartbeat(&msg), env.is_ping());

    // Re-encoding can outgrow one frame once escapes expand. Fields are not
    // compared: float text is not guaranteed to round-trip exactly.
    if let Ok(again) = env.to_message() {
        let reparsed = Envelope::parse(&again).expect("re-encoded envelope must parse");
        assert_eq!(reparsed.kind, env.kind);
        assert_eq!(reparsed.fields.len(), env.fields.len());
    }
});
