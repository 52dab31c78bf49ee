//! Property-based tests for channel frame decoding

use marquee_proto::{InboundFrame, OutboundFrame, ProtocolError};
use proptest::prelude::*;

/// Property: decoding arbitrary text never panics
#[test]
fn prop_decode_never_panics() {
    proptest!(|(text in ".*")| {
        let _ = InboundFrame::decode(&text);
    });
}

/// Property: any object with an unrecognised `type` decodes to no frame
#[test]
fn prop_unknown_kind_is_ignored() {
    proptest!(|(kind in "[a-z_]{1,16}", payload in any::<i64>())| {
        prop_assume!(![
            "message", "participant_status", "user_status", "typing", "pong", "notification",
        ]
        .contains(&kind.as_str()));

        let text = format!(r#"{{"type":"{kind}","payload":{payload}}}"#);
        prop_assert_eq!(InboundFrame::decode(&text), Ok(None));
    });
}

/// Property: a typing frame decodes with the same participant and flag
#[test]
fn prop_typing_frame_preserves_fields() {
    proptest!(|(user in 0u64..1_000_000, is_typing in any::<bool>())| {
        let text = format!(r#"{{"type":"typing","user_id":{user},"is_typing":{is_typing}}}"#);

        match InboundFrame::decode(&text) {
            Ok(Some(InboundFrame::Typing(signal))) => {
                prop_assert_eq!(signal.user_id.as_str(), user.to_string());
                prop_assert_eq!(signal.is_typing, is_typing);
            },
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    });
}

/// Property: JSON that is not an object with a string `type` never yields a frame
#[test]
fn prop_scalars_lack_discriminator() {
    proptest!(|(n in any::<i32>())| {
        prop_assert_eq!(
            InboundFrame::decode(&n.to_string()),
            Err(ProtocolError::MissingDiscriminator)
        );
    });
}

#[test]
fn outbound_typing_matches_decoder_expectations() {
    let text = OutboundFrame::Typing { is_typing: false }.encode().unwrap_or_default();
    assert_eq!(text, r#"{"type":"typing","is_typing":false}"#);
}
