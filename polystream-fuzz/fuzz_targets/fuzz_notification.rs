#![no_main]

use libfuzzer_sys::fuzz_target;
use polystream_sctp::notification::Notification;

fuzz_target!(|data: &[u8]| {
    // Truncated or lying length fields must come back as errors
    let _ = Notification::decode(data);
});
