// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn template_substitutes_placeholders() -> anyhow::Result<()> {
    let template = CommandTemplate::parse("say -v {voice} -o {out} {text}")?;
    let (program, args) =
        template.build(&[("voice", "alloy"), ("out", "/tmp/a"), ("text", "hello")]);
    assert_eq!(program, "say");
    assert_eq!(args, vec!["-v", "alloy", "-o", "/tmp/a", "hello"]);
    Ok(())
}

#[test]
fn empty_template_rejected() {
    assert!(CommandTemplate::parse("   ").is_err());
}

#[test]
fn unknown_placeholders_pass_through() -> anyhow::Result<()> {
    let template = CommandTemplate::parse("play {file}")?;
    let (_, args) = template.build(&[]);
    assert_eq!(args, vec!["{file}"]);
    Ok(())
}

#[tokio::test]
async fn generator_reports_exit_status() -> anyhow::Result<()> {
    assert!(run_generator("true", &[]).await?);
    assert!(!run_generator("false", &[]).await?);
    Ok(())
}

#[tokio::test]
async fn player_spawns_in_its_own_group() -> anyhow::Result<()> {
    let mut child = spawn_player("sleep", &["5".to_owned()])?;
    let pid = child.id().ok_or_else(|| anyhow::anyhow!("no pid"))?;

    kill_group(pid);
    let status = child.wait().await?;
    assert!(!status.success());
    Ok(())
}

#[test]
fn kill_group_tolerates_dead_pid() {
    // Just must not panic or error loudly.
    kill_group(u32::MAX - 2);
}
