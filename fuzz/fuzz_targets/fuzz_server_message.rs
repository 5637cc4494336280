#![no_main]

use libfuzzer_sys::fuzz_target;
use roomsync_client::protocol::ServerMessage;

fuzz_target!(|data: &[u8]| {
    // Relay frames arrive as text; anything that parses must re-serialize.
    if let Ok(msg) = serde_json::from_slice::<ServerMessage>(data) {
        let _ = serde_json::to_string(&msg);
    }
});
