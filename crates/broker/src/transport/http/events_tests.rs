// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::StreamExt;

use super::*;
use crate::bus::EventBus;

#[tokio::test]
async fn frames_deliver_events_in_order() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let mut frames = Box::pin(subscriber_frames(bus.subscribe()));

    bus.publish(Some("s1"), EventKind::SessionCreated, serde_json::json!({}));
    bus.publish(Some("s1"), EventKind::ChoicesPresented, serde_json::json!({}));

    for expected in [EventKind::SessionCreated, EventKind::ChoicesPresented] {
        match frames.next().await {
            Some(Frame::Envelope(envelope)) => assert_eq!(envelope.kind, expected),
            other => anyhow::bail!("unexpected frame {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn overflow_collapses_into_a_lag_frame() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let mut frames = Box::pin(subscriber_frames(bus.subscribe()));

    for _ in 0..300 {
        bus.publish(None, EventKind::Heartbeat, serde_json::json!({}));
    }
    match frames.next().await {
        Some(Frame::Lagged(dropped)) => assert!(dropped > 0),
        other => anyhow::bail!("unexpected frame {other:?}"),
    }
    // The cursor resumes delivering events after the gap marker.
    match frames.next().await {
        Some(Frame::Envelope(_)) => {}
        other => anyhow::bail!("unexpected frame {other:?}"),
    }
    Ok(())
}

#[test]
fn lag_frame_formats_as_lag_event() {
    let event = frame_to_event(Frame::Lagged(42));
    let rendered = format!("{event:?}");
    assert!(rendered.contains("lag"), "event: {rendered}");
    assert!(rendered.contains("42"), "event: {rendered}");
}
