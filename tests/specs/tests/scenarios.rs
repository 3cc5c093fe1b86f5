// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven against the real `parley` binary.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use serde_json::json;

use parley_specs::{BrokerOptions, BrokerProcess};

async fn wait_for_audio_state(broker: &BrokerProcess, expected: &str) -> anyhow::Result<()> {
    for _ in 0..100 {
        let health = broker.get_json("/api/v1/health").await?;
        if health["audio"] == expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("audio never reached {expected}")
}

fn choices_body(labels: &[&str]) -> serde_json::Value {
    json!({
        "preamble": "",
        "choices": labels.iter().map(|l| json!({"label": l})).collect::<Vec<_>>(),
    })
}

/// Two concurrent choices on the same session resolve in enqueue order.
#[tokio::test]
async fn stacked_choices_resolve_in_enqueue_order() -> anyhow::Result<()> {
    let broker = BrokerProcess::start().await?;
    broker.register("a").await?;
    let mut events = broker.subscribe().await?;

    let b1 = broker.tool("a", None, "present_choices", choices_body(&["Apple", "Pear"]));
    let c1 = tokio::spawn(b1);
    broker.wait_for_choices("a", "Apple").await?;

    let b2 = broker.tool("a", None, "present_choices", choices_body(&["Red", "Blue"]));
    let c2 = tokio::spawn(b2);
    // The second call queues behind the first; the view still shows Apple/Pear.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!c2.is_finished());

    broker.post("/api/v1/sessions/a/select", json!({"label": "Pear"})).await?;
    let r1: serde_json::Value = c1.await??.json().await?;
    assert_eq!(r1["selected"], "Pear");

    broker.wait_for_choices("a", "Red").await?;
    broker.post("/api/v1/sessions/a/select", json!({"label": "Blue"})).await?;
    let r2: serde_json::Value = c2.await??.json().await?;
    assert_eq!(r2["selected"], "Blue");

    // choices_presented and selection_made alternate with increasing seq.
    let mut seen: Vec<(String, serde_json::Value)> = Vec::new();
    while seen.iter().filter(|entry| entry.0 == "selection_made").count() < 2 {
        let (kind, data) = events.next_event().await?;
        if kind == "choices_presented" || kind == "selection_made" {
            seen.push((kind, data));
        }
    }
    let kinds: Vec<&str> = seen.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["choices_presented", "selection_made", "choices_presented", "selection_made"]
    );
    let seqs: Vec<u64> =
        seen.iter().filter_map(|(_, d)| d["seq"].as_u64()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs: {seqs:?}");
    Ok(())
}

/// Urgent speech preempts a long blocking line from another session; the
/// cut-off caller returns only after the urgent line has finished playing.
#[tokio::test]
async fn urgent_speech_preempts_playback() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let broker = BrokerProcess::start_with(BrokerOptions {
        player: parley_specs::script_player(dir.path(), "sleep 2")?,
        ..BrokerOptions::default()
    })
    .await?;
    broker.register("a").await?;
    broker.register("b").await?;

    let long = broker.tool("a", None, "speak", json!({"text": "a very long line"}));
    let long = tokio::spawn(long);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!long.is_finished(), "blocking speak should still be playing");

    // speak_urgent acknowledges at playback start.
    let urgent_started = std::time::Instant::now();
    let urgent: serde_json::Value =
        broker.tool("b", None, "speak_urgent", json!({"text": "stop"})).await?.json().await?;
    assert_eq!(urgent["ok"], true);

    // A's call is still pending: its line was cut off, and it resolves
    // only after B's urgent playback has been heard in full.
    assert!(!long.is_finished(), "preempted speak must wait for the urgent line");
    let r = tokio::time::timeout(Duration::from_secs(5), long).await???;
    let body: serde_json::Value = r.json().await?;
    assert_eq!(body["ok"], true);
    assert!(
        urgent_started.elapsed() >= Duration::from_millis(1500),
        "preempted speak resolved before the urgent playback finished"
    );
    Ok(())
}

/// Transport cancellation of a queued item leaves the active one alone.
#[tokio::test]
async fn cancelling_a_queued_item_spares_the_head() -> anyhow::Result<()> {
    let broker = BrokerProcess::start().await?;
    broker.register("a").await?;

    let c1 = tokio::spawn(broker.tool("a", Some("call-1"), "present_choices", choices_body(&["A"])));
    broker.wait_for_choices("a", "A").await?;
    let c2 = tokio::spawn(broker.tool("a", Some("call-2"), "present_choices", choices_body(&["B"])));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancel = broker
        .post("/api/v1/tools/cancel", json!({"session_id": "a", "call_id": "call-2"}))
        .await?;
    assert!(cancel.status().is_success());

    let r2 = c2.await??;
    assert_eq!(r2.status().as_u16(), 409);
    let body: serde_json::Value = r2.json().await?;
    assert_eq!(body["error"]["code"], "cancelled");

    // The head item is still live and resolves normally.
    broker.post("/api/v1/sessions/a/select", json!({"label": "A"})).await?;
    let r1: serde_json::Value = c1.await??.json().await?;
    assert_eq!(r1["selected"], "A");

    let detail = broker.get_json("/api/v1/sessions/a").await?;
    assert_eq!(detail["session"]["inbox_depth"], 0);
    Ok(())
}

/// A reconnecting frontend gets a cursor at head, no replay.
#[tokio::test]
async fn frontend_reconnect_skips_missed_events() -> anyhow::Result<()> {
    let broker = BrokerProcess::start().await?;

    let mut first = broker.subscribe().await?;
    broker.register("a").await?;
    let (kind, data) = first.next_event().await?;
    assert_eq!(kind, "session_created");
    let first_seq = data["seq"].as_u64().unwrap_or(0);
    drop(first);

    // Events published while disconnected are gone for this subscriber.
    broker.register("b").await?;
    broker.register("c").await?;

    let mut second = broker.subscribe().await?;
    broker.register("d").await?;
    let (kind, data) = second.next_event().await?;
    assert_eq!(kind, "session_created");
    assert_eq!(data["session_id"], "d");
    assert!(data["seq"].as_u64().unwrap_or(0) > first_seq + 1);

    // Fresh state comes from the snapshot, not the stream.
    let sessions = broker.get_json("/api/v1/sessions").await?;
    let ids: Vec<&str> = sessions
        .as_array()
        .map(|list| list.iter().filter_map(|s| s["id"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
    Ok(())
}

/// Player failures escalate the recovery machine; pulses fire exactly once
/// per outage.
#[tokio::test]
async fn audio_recovery_escalates_and_recovers() -> anyhow::Result<()> {
    // A player that fails until a marker file appears.
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("fixed");
    let script = dir.path().join("player.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\ntest -e {} || exit 1\nexit 0\n", marker.display()),
    )?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

    let broker = BrokerProcess::start_with(BrokerOptions {
        player: format!("{} {{file}}", script.display()),
        ..BrokerOptions::default()
    })
    .await?;
    broker.register("a").await?;
    let mut events = broker.subscribe().await?;

    // Two failing playbacks take the device into recovery, at which point
    // non-urgent speech is gated; a failing urgent attempt escalates further.
    for text in ["one", "two"] {
        let resp = broker.tool("a", None, "speak", json!({"text": text})).await?;
        assert!(resp.status().is_success(), "speak must resolve despite audio failure");
    }
    let resp = broker.tool("a", None, "speak_urgent", json!({"text": "three"})).await?;
    assert!(resp.status().is_success());
    wait_for_audio_state(&broker, "recovering(2)").await?;

    // Device comes back; the next line plays and recovery announces once.
    std::fs::write(&marker, b"")?;
    // Non-urgent speech is dropped while recovering; urgent is attempted.
    let resp = broker.tool("a", None, "speak_urgent", json!({"text": "back"})).await?;
    assert!(resp.status().is_success());

    let mut pulse_down = 0;
    let mut pulse_recovered = 0;
    for _ in 0..40 {
        let (kind, _) = events.next_event().await?;
        match kind.as_str() {
            "pulse_down" => pulse_down += 1,
            "pulse_recovered" => pulse_recovered += 1,
            _ => {}
        }
        if pulse_recovered > 0 {
            break;
        }
    }
    assert_eq!(pulse_down, 1);
    assert_eq!(pulse_recovered, 1);

    let health = broker.get_json("/api/v1/health").await?;
    assert_eq!(health["audio"], "healthy");
    Ok(())
}

/// Operator notes queued mid-call ride back on the tool response.
#[tokio::test]
async fn pending_messages_attach_to_the_next_response() -> anyhow::Result<()> {
    let broker = BrokerProcess::start().await?;
    broker.register("a").await?;

    let call =
        tokio::spawn(broker.tool("a", None, "present_choices", choices_body(&["Continue"])));
    broker.wait_for_choices("a", "Continue").await?;

    broker.post("/api/v1/sessions/a/message", json!({"text": "remember tests"})).await?;
    broker.post("/api/v1/sessions/a/message", json!({"text": "also docs"})).await?;
    broker.post("/api/v1/sessions/a/select", json!({"label": "Continue"})).await?;

    let result: serde_json::Value = call.await??.json().await?;
    assert_eq!(result["selected"], "Continue");
    assert_eq!(result["pending_messages"], json!(["remember tests", "also docs"]));

    let inbox: serde_json::Value =
        broker.tool("a", None, "check_inbox", json!({})).await?.json().await?;
    assert_eq!(inbox["pending_messages"], json!([]));
    Ok(())
}
