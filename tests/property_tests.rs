//! Property-based tests for the WTP control plane
//!
//! Uses proptest to verify framing, reassembly and sequencing invariants
//! across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Fragmentation and Reassembly Properties
// ============================================================================

mod reassembly_properties {
    use super::*;
    use wtp_core::SessionId;
    use wtp_core::fragment::{self, Fragment};
    use wtp_core::reassembly::ReassemblyBuffer;

    fn fragments(message: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
        fragment::split(SessionId::from_bytes([3; 16]), 9, false, message, max_payload)
    }

    proptest! {
        /// Fragments delivered in any order reassemble to the original message
        #[test]
        fn any_order_reassembles(
            message in prop::collection::vec(any::<u8>(), 1..4096),
            max_payload in 1usize..700,
            seed in any::<u64>(),
        ) {
            let mut encoded = fragments(&message, max_payload);
            prop_assert_eq!(encoded.len(), message.len().div_ceil(max_payload));

            // Fisher-Yates with an xorshift stream seeded by proptest
            let mut state = seed | 1;
            for i in (1..encoded.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                encoded.swap(i, j);
            }

            let mut buffer = ReassemblyBuffer::new();
            let mut completed = Vec::new();
            for bytes in &encoded {
                let parsed = Fragment::parse(bytes).unwrap();
                let header = parsed.header;
                if let Some(whole) = buffer
                    .insert(header.offset, parsed.payload, header.flags.is_last())
                    .unwrap()
                {
                    completed.push(whole);
                }
            }
            prop_assert_eq!(completed.len(), 1);
            prop_assert_eq!(&completed[0], &message);
        }

        /// Duplicated fragments never change the reassembled message
        #[test]
        fn duplicates_are_harmless(
            message in prop::collection::vec(any::<u8>(), 1..2048),
            max_payload in 16usize..256,
            duplicate in any::<prop::sample::Index>(),
        ) {
            let encoded = fragments(&message, max_payload);
            let repeat = duplicate.get(&encoded).clone();

            let mut buffer = ReassemblyBuffer::new();
            let mut result = None;
            for bytes in std::iter::once(&repeat).chain(encoded.iter()) {
                let parsed = Fragment::parse(bytes).unwrap();
                if let Ok(Some(whole)) =
                    buffer.insert(parsed.header.offset, parsed.payload, parsed.header.flags.is_last())
                {
                    result = Some(whole);
                }
            }
            prop_assert_eq!(result, Some(message));
        }

        /// Every fragment fits the requested payload size
        #[test]
        fn fragments_respect_payload_limit(
            len in 1usize..8192,
            max_payload in 1usize..1500,
        ) {
            let message = vec![0xA5u8; len];
            for bytes in fragments(&message, max_payload) {
                let parsed = Fragment::parse(&bytes).unwrap();
                prop_assert!(parsed.payload.len() <= max_payload);
            }
        }

        /// Arbitrary bytes never panic the fragment parser
        #[test]
        fn parse_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = Fragment::parse(&data);
            let _ = fragment::split_preamble(&data);
        }
    }
}

// ============================================================================
// Message Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use wtp_core::{Message, MessageCodec, MessageElement, MessageType, TlvCodec};

    proptest! {
        /// Arbitrary bytes never panic the decoder
        #[test]
        fn decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = TlvCodec.decode(&data);
        }

        /// Unknown elements survive re-encoding byte for byte
        #[test]
        fn raw_elements_preserved(
            element_type in 2000u16..3000,
            value in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let message = Message::new(MessageType::WtpEventRequest)
                .with(MessageElement::Raw { element_type, value });
            let bytes = TlvCodec.encode(&message).unwrap();
            let decoded = TlvCodec.decode(&bytes).unwrap();
            prop_assert_eq!(TlvCodec.encode(&decoded).unwrap(), bytes);
            prop_assert_eq!(decoded, message);
        }

        /// Requests are odd and their response is the next type
        #[test]
        fn request_response_pairing(value in 1u16..u16::MAX) {
            let message_type = MessageType::from_u16(value);
            prop_assert_eq!(message_type.as_u16(), value);
            if message_type.is_request() {
                prop_assert_eq!(message_type.response().as_u16(), value + 1);
            }
        }
    }
}

// ============================================================================
// Sequencing Properties
// ============================================================================

mod sequence_properties {
    use super::*;
    use wtp_core::session::RemoteSequence;

    proptest! {
        /// After processing `last`, only `last + 1` is new and only `last` repeats
        #[test]
        fn remote_sequence_window(last in any::<u8>(), candidate in any::<u8>()) {
            let remote = RemoteSequence::Last(last);
            prop_assert_eq!(remote.accepts(candidate), candidate == last.wrapping_add(1));
            prop_assert_eq!(remote.is_repeat(candidate), candidate == last);
            prop_assert!(!(remote.accepts(candidate) && remote.is_repeat(candidate)));
        }

        /// The initial state accepts everything and repeats nothing
        #[test]
        fn initial_accepts_everything(candidate in any::<u8>()) {
            prop_assert!(RemoteSequence::Initial.accepts(candidate));
            prop_assert!(!RemoteSequence::Initial.is_repeat(candidate));
        }
    }
}

// ============================================================================
// Data Channel Policy Properties
// ============================================================================

mod policy_properties {
    use super::*;
    use wtp_crypto::DataChannelPolicy;

    proptest! {
        /// Negotiation is symmetric and never grants a mode either side lacks
        #[test]
        fn intersection_is_common_subset(a in 0u8..4, b in 0u8..4) {
            let local = DataChannelPolicy::from_bits(a);
            let peer = DataChannelPolicy::from_bits(b);
            let agreed = local.intersect(peer);
            prop_assert_eq!(agreed, peer.intersect(local));
            prop_assert!(local.contains(agreed));
            prop_assert!(peer.contains(agreed));
        }
    }
}
