//! Property-based tests for the framing codec.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use lattice_transport::{framing, FrameDecoder, TransportError, MAX_PAYLOAD_SIZE};

    proptest! {
        /// decode(encode(P)) == P for every payload within the limit.
        #[test]
        fn roundtrip_preserves_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE)
        ) {
            let frame = framing::encode(&payload).unwrap();
            let mut decoder = FrameDecoder::new();
            decoder.extend(&frame);
            let decoded = decoder.next_frame().unwrap().unwrap();
            prop_assert_eq!(&decoded[..], &payload[..]);
            prop_assert!(decoder.next_frame().unwrap().is_none());
            prop_assert_eq!(decoder.buffered(), 0);
        }

        /// Reassembly is insensitive to where the read boundary falls.
        #[test]
        fn roundtrip_across_arbitrary_split(
            payload in proptest::collection::vec(any::<u8>(), 0..=2048),
            cut in any::<proptest::sample::Index>()
        ) {
            let frame = framing::encode(&payload).unwrap();
            let cut = cut.index(frame.len() + 1);
            let mut decoder = FrameDecoder::new();
            decoder.extend(&frame[..cut]);
            if cut < frame.len() {
                prop_assert!(decoder.next_frame().unwrap().is_none());
            }
            decoder.extend(&frame[cut..]);
            let decoded = decoder.next_frame().unwrap().unwrap();
            prop_assert_eq!(&decoded[..], &payload[..]);
        }

        /// A stream of frames fed in fixed-size chunks decodes to the same
        /// payload sequence, in order.
        #[test]
        fn chunked_stream_preserves_sequence(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..=64),
                1..8
            ),
            chunk_size in 1usize..16
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend_from_slice(&framing::encode(payload).unwrap());
            }
            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoder.extend(chunk);
                while let Some(payload) = decoder.next_frame().unwrap() {
                    decoded.push(payload.to_vec());
                }
            }
            prop_assert_eq!(decoded, payloads);
        }

        /// Oversized payloads never encode, and no partial frame leaks.
        #[test]
        fn oversized_payload_never_encodes(extra in 1usize..512) {
            let payload = vec![0u8; MAX_PAYLOAD_SIZE + extra];
            prop_assert!(
                matches!(
                    framing::encode(&payload),
                    Err(TransportError::FrameTooLarge { .. })
                ),
                "oversized payload must fail to encode"
            );
        }
    }
}
