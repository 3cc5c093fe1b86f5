// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::*;
use crate::test_support::BrokerBuilder;

async fn wait_for_active(ctx: &crate::test_support::BrokerCtx, id: &str) -> anyhow::Result<()> {
    for _ in 0..100 {
        if let Some(session) = ctx.broker.registry.get(id) {
            if session.active_item().is_some() {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("no item became active on {id}")
}

#[tokio::test]
async fn register_session_is_idempotent() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    let d = &ctx.broker.dispatcher;

    let first = d.dispatch("register_session", Some("s1"), None, json!({})).await;
    let second = d
        .dispatch("register_session", Some("s1"), None, json!({"name": "builder"}))
        .await;
    let first = first.map_err(|e| anyhow::anyhow!(e.message))?;
    let second = second.map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(first["session_id"], second["session_id"]);
    assert_eq!(ctx.broker.registry.len(), 1);

    // The rename hint applied on the second call.
    let session =
        ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("missing session"))?;
    assert_eq!(session.name(), "builder");
    Ok(())
}

#[tokio::test]
async fn register_without_identity_mints_one() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    let result = ctx
        .broker
        .dispatcher
        .dispatch("register_session", None, None, json!({"cwd": "/work"}))
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;
    let id = result["session_id"].as_str().unwrap_or_default();
    assert!(!id.is_empty());
    assert!(ctx.broker.registry.get(id).is_some());
    Ok(())
}

#[tokio::test]
async fn unknown_session_is_invalid_request() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    let err = match ctx.broker.dispatcher.dispatch("check_inbox", Some("ghost"), None, json!({})).await
    {
        Err(e) => e,
        Ok(v) => anyhow::bail!("expected error, got {v}"),
    };
    assert_eq!(err.code, ErrorCode::InvalidRequest);
    Ok(())
}

#[tokio::test]
async fn unknown_tool_is_invalid_request() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());
    let err = match ctx.broker.dispatcher.dispatch("frobnicate", Some("s1"), None, json!({})).await {
        Err(e) => e,
        Ok(v) => anyhow::bail!("expected error, got {v}"),
    };
    assert_eq!(err.code, ErrorCode::InvalidRequest);
    Ok(())
}

#[tokio::test]
async fn present_choices_round_trips_the_selection() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());

    let dispatcher = ctx.broker.dispatcher.clone();
    let call = tokio::spawn(async move {
        dispatcher
            .dispatch(
                "present_choices",
                Some("s1"),
                None,
                json!({
                    "preamble": "",
                    "choices": [
                        {"label": "Apple", "summary": "a fruit"},
                        {"label": "Pear", "summary": "another fruit"},
                    ],
                }),
            )
            .await
    });

    wait_for_active(&ctx, "s1").await?;
    let session =
        ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("missing session"))?;
    ctx.broker.engine.resolve_active(
        &session,
        vec!["Pear".to_owned()],
        Some("another fruit".to_owned()),
    );

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await??
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(result["selected"], "Pear");
    assert_eq!(result["summary"], "another fruit");
    assert_eq!(result["pending_messages"], json!([]));
    Ok(())
}

#[tokio::test]
async fn multi_select_returns_all_labels() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());

    let dispatcher = ctx.broker.dispatcher.clone();
    let call = tokio::spawn(async move {
        dispatcher
            .dispatch(
                "present_multi_select",
                Some("s1"),
                None,
                json!({"choices": [{"label": "A"}, {"label": "B"}, {"label": "C"}]}),
            )
            .await
    });

    wait_for_active(&ctx, "s1").await?;
    let session =
        ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("missing session"))?;
    ctx.broker.engine.resolve_active(&session, vec!["A".to_owned(), "C".to_owned()], None);

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await??
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(result["selected"], json!(["A", "C"]));
    Ok(())
}

#[tokio::test]
async fn pending_messages_ride_the_next_response() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());

    let dispatcher = ctx.broker.dispatcher.clone();
    let call = tokio::spawn(async move {
        dispatcher
            .dispatch(
                "present_choices",
                Some("s1"),
                None,
                json!({"choices": [{"label": "Continue"}]}),
            )
            .await
    });

    wait_for_active(&ctx, "s1").await?;
    let session =
        ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("missing session"))?;
    session.queue_message("remember tests");
    session.queue_message("also docs");
    ctx.broker.engine.resolve_active(&session, vec!["Continue".to_owned()], None);

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await??
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(result["pending_messages"], json!(["remember tests", "also docs"]));

    // A follow-up check_inbox finds the queue drained.
    let result = ctx
        .broker
        .dispatcher
        .dispatch("check_inbox", Some("s1"), None, json!({}))
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(result["pending_messages"], json!([]));
    Ok(())
}

#[tokio::test]
async fn empty_choices_rejected_synchronously() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());
    let err = match ctx
        .broker
        .dispatcher
        .dispatch("present_choices", Some("s1"), None, json!({"choices": []}))
        .await
    {
        Err(e) => e,
        Ok(v) => anyhow::bail!("expected error, got {v}"),
    };
    assert_eq!(err.code, ErrorCode::InvalidRequest);
    Ok(())
}

#[tokio::test]
async fn speak_async_returns_at_enqueue() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());
    let result = ctx
        .broker
        .dispatcher
        .dispatch("speak_async", Some("s1"), None, json!({"text": "on my way"}))
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(result["ok"], true);
    Ok(())
}

#[tokio::test]
async fn cancelled_call_surfaces_reason() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());

    let dispatcher = ctx.broker.dispatcher.clone();
    let call = tokio::spawn(async move {
        dispatcher
            .dispatch(
                "present_choices",
                Some("s1"),
                Some("call-9".to_owned()),
                json!({"choices": [{"label": "A"}]}),
            )
            .await
    });
    wait_for_active(&ctx, "s1").await?;

    let cancel = ctx
        .broker
        .dispatcher
        .cancel("s1", "call-9")
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(cancel["cancelled"], true);

    let err = match tokio::time::timeout(Duration::from_secs(2), call).await?? {
        Err(e) => e,
        Ok(v) => anyhow::bail!("expected cancellation, got {v}"),
    };
    assert_eq!(err.code, ErrorCode::Cancelled);
    assert_eq!(err.message, "transport");
    Ok(())
}

#[tokio::test]
async fn rename_session_requires_a_name() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    ctx.broker.registry.get_or_create("s1", Default::default());

    let ok = ctx
        .broker
        .dispatcher
        .dispatch("rename_session", Some("s1"), None, json!({"name": "refactorer"}))
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(ok["ok"], true);
    let session = ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(session.name(), "refactorer");

    let err = match ctx
        .broker
        .dispatcher
        .dispatch("rename_session", Some("s1"), None, json!({"name": "  "}))
        .await
    {
        Err(e) => e,
        Ok(v) => anyhow::bail!("expected error, got {v}"),
    };
    assert_eq!(err.code, ErrorCode::InvalidRequest);
    Ok(())
}

#[tokio::test]
async fn voice_hints_apply_to_session_profile() -> anyhow::Result<()> {
    let ctx = BrokerBuilder::new().build()?;
    let _ = ctx
        .broker
        .dispatcher
        .dispatch(
            "register_session",
            Some("s1"),
            None,
            json!({"voice": "echo", "style": "brisk"}),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.message))?;
    let session = ctx.broker.registry.get("s1").ok_or_else(|| anyhow::anyhow!("gone"))?;
    let profile = session.voice();
    assert_eq!(profile.voice.as_deref(), Some("echo"));
    assert_eq!(profile.style.as_deref(), Some("brisk"));
    Ok(())
}
