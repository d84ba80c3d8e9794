// tests/property/codec_test.rs

//! Property-based tests for the RESP codec: replies split at arbitrary points
//! decode to the same frames as when they arrive whole.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use spinelbridge::core::protocol::{RespFrame, RespFrameCodec};
use tokio_util::codec::{Decoder, Encoder};

fn reply_frame() -> impl Strategy<Value = RespFrame> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 ]{0,32}".prop_map(RespFrame::SimpleString),
        "[a-zA-Z0-9 ]{0,32}".prop_map(RespFrame::Error),
        any::<i64>().prop_map(RespFrame::Integer),
        proptest::collection::vec(any::<u8>(), 0..256)
            .prop_map(|v| RespFrame::BulkString(Bytes::from(v))),
        Just(RespFrame::Null),
        Just(RespFrame::NullArray),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        proptest::collection::vec(inner, 0..6).prop_map(RespFrame::Array)
    })
}

fn encode(frames: &[RespFrame]) -> BytesMut {
    let mut buf = BytesMut::new();
    for frame in frames {
        RespFrameCodec.encode(frame.clone(), &mut buf).unwrap();
    }
    buf
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_fragmented_stream_decodes_like_whole(
        frames in proptest::collection::vec(reply_frame(), 1..8),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let wire = encode(&frames);

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(wire.len() + 1)).collect();
        points.push(wire.len());
        points.sort_unstable();
        points.dedup();

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut start = 0;
        for end in points {
            buf.extend_from_slice(&wire[start..end]);
            start = end;
            while let Some(frame) = RespFrameCodec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, frames);
    }

    #[test]
    fn test_truncated_frame_is_never_an_error(
        frame in reply_frame(),
        cut in any::<prop::sample::Index>(),
    ) {
        let wire = encode(std::slice::from_ref(&frame));
        let len = cut.index(wire.len());
        let mut partial = BytesMut::from(&wire[..len]);
        prop_assert_eq!(RespFrameCodec.decode(&mut partial).unwrap(), None);
        prop_assert_eq!(partial.len(), len);
    }
}
