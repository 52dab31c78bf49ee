//! Property-based tests for the typing debouncer

use std::time::{Duration, Instant};

use marquee_core::TypingDebouncer;
use marquee_proto::OutboundFrame;
use proptest::prelude::*;

const STOP_AFTER: Duration = Duration::from_secs(5);

/// Property: N keystrokes with gaps under 5s produce one start frame and
/// exactly one stop frame, 5s after the last keystroke
#[test]
fn prop_burst_emits_single_stop() {
    proptest!(|(gaps in prop::collection::vec(0u64..4_999, 1..40))| {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(STOP_AFTER);
        let mut now = t0;
        let mut starts = 0;
        let mut stops = 0;

        for gap in gaps {
            now += Duration::from_millis(gap);
            if typing.poll(now).is_some() {
                stops += 1;
            }
            if typing.keystroke(now) == Some(OutboundFrame::Typing { is_typing: true }) {
                starts += 1;
            }
        }

        let last = now;
        prop_assert!(typing.poll(last + STOP_AFTER - Duration::from_millis(1)).is_none());
        prop_assert_eq!(
            typing.poll(last + STOP_AFTER),
            Some(OutboundFrame::Typing { is_typing: false })
        );
        stops += 1;
        prop_assert!(typing.poll(last + STOP_AFTER * 3).is_none());

        prop_assert_eq!(starts, 1);
        prop_assert_eq!(stops, 1);
    });
}

/// Property: a gap of at least 5s splits keystrokes into separate bursts
#[test]
fn prop_long_pause_starts_new_burst() {
    proptest!(|(pause in 5_000u64..20_000)| {
        let t0 = Instant::now();
        let mut typing = TypingDebouncer::new(STOP_AFTER);

        prop_assert!(typing.keystroke(t0).is_some());
        let t1 = t0 + Duration::from_millis(pause);
        prop_assert_eq!(typing.poll(t1), Some(OutboundFrame::Typing { is_typing: false }));
        prop_assert!(typing.keystroke(t1).is_some());
    });
}
