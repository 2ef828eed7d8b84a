//! Fuzz target for transport frame decoding.
//!
//! Peers are remote and untrusted: decoding arbitrary bytes must never
//! panic, and a frame that decodes must re-encode to the bytes consumed.

#![no_main]

use cache_replicator::transport::wire::{decode_frame, encode_frame, Request, Response, MAX_FRAME_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some((request, used))) = decode_frame::<Request>(data) {
        assert!(used <= data.len());
        assert!(used - 4 <= MAX_FRAME_LEN);
        // The cache name is always reachable
        let _ = request.cache();
        let frame = encode_frame(&request).expect("decoded request re-encodes");
        let (again, _) = decode_frame::<Request>(&frame)
            .expect("re-encoded frame decodes")
            .expect("re-encoded frame is complete");
        assert_eq!(again, request);
    }

    if let Ok(Some((response, _))) = decode_frame::<Response>(data) {
        let _ = response.into_peer_error();
    }
});
