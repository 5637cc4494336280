#![no_main]

use libfuzzer_sys::fuzz_target;
use roomsync_client::{parse_history, Transcript};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(records) = parse_history(text) {
        let transcript = Transcript::from_records(records);
        assert!(transcript
            .as_slice()
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }
});
