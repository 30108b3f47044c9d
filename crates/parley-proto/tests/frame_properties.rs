//! Property-based tests for framing and wire encodings
//!
//! A TCP stream can split frames at any byte boundary. These tests feed
//! encoded frames through `FrameBuffer` in arbitrary chunk sizes and verify
//! that exactly the original bodies come out, in order.

use std::collections::{BTreeMap, BTreeSet};

use bytes::BytesMut;
use parley_proto::{
    Action, DirectorySnapshot, FrameBuffer, Message, MessageFlags, RoomEntry, encode_frame,
};
use proptest::prelude::*;

fn arbitrary_action() -> impl Strategy<Value = Action> {
    (0u8..=8).prop_map(|v| Action::from_u8(v).unwrap())
}

fn arbitrary_message() -> impl Strategy<Value = Message> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        arbitrary_action(),
        prop::collection::vec(any::<u8>(), 0..256),
        any::<u8>(),
    )
        .prop_map(|(sender, recipient, time, action, data, flags)| {
            Message::new(action, recipient, data)
                .with_sender(sender)
                .with_send_time(time)
                .with_flags(MessageFlags::from_bits(flags))
        })
}

fn arbitrary_snapshot() -> impl Strategy<Value = DirectorySnapshot> {
    (
        prop::collection::btree_map(any::<u64>(), "[a-z]{1,12}", 0..8),
        prop::collection::btree_map(
            any::<u64>(),
            ("[a-z ]{0,16}", prop::collection::btree_set(any::<u64>(), 0..6)),
            0..6,
        ),
    )
        .prop_map(|(users, rooms)| DirectorySnapshot {
            users,
            rooms: rooms
                .into_iter()
                .map(|(id, (name, members))| (id, RoomEntry { name, members }))
                .collect::<BTreeMap<u64, RoomEntry>>(),
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_chunked_stream_yields_original_frames(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..8),
        chunk in 1usize..64,
    ) {
        let mut stream = BytesMut::new();
        for body in &bodies {
            encode_frame(body, &mut stream).unwrap();
        }

        let mut buffer = FrameBuffer::new();
        let mut out = Vec::new();
        for piece in stream.chunks(chunk) {
            buffer.extend(piece);
            while let Some(frame) = buffer.next_frame().unwrap() {
                out.push(frame.to_vec());
            }
        }

        // PROPERTY: chunking never changes what comes out
        prop_assert_eq!(out, bodies);
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn prop_message_decode_inverts_encode(msg in arbitrary_message()) {
        let bytes = msg.to_bytes().unwrap();
        prop_assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn prop_snapshot_decode_inverts_encode(snapshot in arbitrary_snapshot()) {
        let bytes = snapshot.to_bytes().unwrap();
        let decoded = DirectorySnapshot::from_bytes(&bytes).unwrap();

        prop_assert_eq!(&decoded, &snapshot);
        // Membership sets survive as sets, not sequences
        for (id, room) in &snapshot.rooms {
            let members: &BTreeSet<u64> = &decoded.rooms[id].members;
            prop_assert_eq!(members, &room.members);
        }
    }
}
