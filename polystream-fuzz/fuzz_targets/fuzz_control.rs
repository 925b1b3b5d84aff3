#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use polystream_sctp::codec;

fuzz_target!(|data: &[u8]| {
    // Arbitrary ancillary data must decode or fail, never panic
    let _ = codec::decode_all(data);

    // Whatever metadata we accept has to survive a re-encode
    if let Ok(Some(meta)) = codec::decode_control(data) {
        let mut out = BytesMut::new();
        codec::encode_send(&meta, &mut out);
        let again = codec::decode_control(&out).expect("re-encoded control decodes");
        assert_eq!(again.map(|m| m.stream), Some(meta.stream));
    }
});
