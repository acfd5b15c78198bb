//! Property tests for the frame codec and masking engine

use proptest::prelude::*;
use wsgate_core::frame::{encode_with_mask, FrameParser};
use wsgate_core::mask::apply_mask;
use wsgate_core::{decode, encode, Opcode};

fn data_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![Just(Opcode::Text), Just(Opcode::Binary)]
}

proptest! {
    #[test]
    fn masked_frames_decode_to_original_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..70_000),
        key in any::<[u8; 4]>(),
        opcode in data_opcode(),
    ) {
        let bytes = encode_with_mask(&payload, opcode, Some(key)).unwrap();
        let frame = decode(&bytes).unwrap();
        prop_assert!(frame.fin);
        prop_assert!(frame.masked);
        prop_assert_eq!(frame.mask, Some(key));
        prop_assert_eq!(frame.opcode, opcode);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn unmasked_frames_decode_to_original_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..300),
        opcode in data_opcode(),
    ) {
        let bytes = encode(&payload, opcode, false).unwrap();
        let frame = decode(&bytes).unwrap();
        prop_assert!(!frame.masked);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn masking_is_self_inverse(
        data in proptest::collection::vec(any::<u8>(), 0..512),
        key in any::<[u8; 4]>(),
    ) {
        let twice = apply_mask(key, &apply_mask(key, &data));
        prop_assert_eq!(&twice[..], &data[..]);
    }

    #[test]
    fn parser_is_split_point_agnostic(
        payload in proptest::collection::vec(any::<u8>(), 0..2_000),
        key in any::<[u8; 4]>(),
        split in any::<prop::sample::Index>(),
    ) {
        let bytes = encode_with_mask(&payload, Opcode::Binary, Some(key)).unwrap();
        let at = split.index(bytes.len() + 1);

        let mut parser = FrameParser::server(usize::MAX);
        parser.feed(&bytes[..at]);
        let early = parser.next_frame().unwrap();
        if at < bytes.len() {
            prop_assert!(early.is_none());
            parser.feed(&bytes[at..]);
            let frame = parser.next_frame().unwrap().unwrap();
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        } else {
            prop_assert_eq!(&early.unwrap().payload[..], &payload[..]);
        }
        prop_assert_eq!(parser.buffered_bytes(), 0);
    }
}
