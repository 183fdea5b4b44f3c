use anyhow::Result;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run the CLI binary against the workspace in `temp_dir`
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<std::process::Output> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_memdex"));
    cmd.arg("--workspace")
        .arg(temp_dir.path())
        .args(args)
        .env("RUST_LOG", "error") // Reduce log noise
        .env("EMBEDDING_PROVIDER", "disabled")
        .env_remove("OPENAI_API_KEY")
        .env_remove("GOOGLE_API_KEY");

    let output = cmd.output()?;
    Ok(output)
}

/// Helper to write an agent's memory document
fn write_memory(temp_dir: &TempDir, agent_id: &str, text: &str) -> Result<()> {
    let dir = temp_dir.path().join(agent_id).join("memory");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("MEMORY.md"), text)?;
    Ok(())
}

fn assert_success(output: &std::process::Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Test that the binary runs and lists its subcommands
#[test]
fn test_cli_help() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let output = run_cli(&temp_dir, &["--help"])?;
    assert_success(&output, "help");

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("per-agent memory indexes"));
    for subcommand in ["query", "rebuild", "status", "chunks", "migrate", "forget"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}");
    }
    Ok(())
}

/// Test query output in every format
#[test]
fn test_cli_query_formats() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    write_memory(
        &temp_dir,
        "alice",
        "The staging password rotates on Fridays.",
    )?;

    let output = run_cli(&temp_dir, &["query", "alice", "staging password"])?;
    assert_success(&output, "query");
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Found 1 relevant chunks"));
    assert!(stdout.contains("Score: 1.000"));

    let output = run_cli(
        &temp_dir,
        &["query", "alice", "staging password", "--format", "full"],
    )?;
    assert_success(&output, "query --format full");
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.starts_with("[Memory Retrieval Results]"));
    assert!(stdout.contains("rotates on Fridays"));

    let output = run_cli(
        &temp_dir,
        &["query", "alice", "bicycle", "--format", "json", "--top-k", "2"],
    )?;
    assert_success(&output, "query --format json");
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["agent_id"], "alice");
    assert_eq!(json["results"].as_array().map(Vec::len), Some(0));
    Ok(())
}

/// Test the maintenance commands on one agent
#[test]
fn test_cli_index_lifecycle() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    write_memory(&temp_dir, "alice", "Alice likes green tea.")?;

    let output = run_cli(&temp_dir, &["status", "alice", "--format", "json"])?;
    assert_success(&output, "status");
    let status: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(status["state"], "stale");
    assert_eq!(status["engine"], "sqlite");

    let output = run_cli(&temp_dir, &["rebuild", "alice"])?;
    assert_success(&output, "rebuild");
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Index for agent alice is fresh (1 chunks)"));

    let output = run_cli(&temp_dir, &["status", "alice"])?;
    assert_success(&output, "status");
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("State: fresh"));
    assert!(stdout.contains("Chunks: 1"));

    let output = run_cli(&temp_dir, &["chunks", "alice", "--format", "json"])?;
    assert_success(&output, "chunks");
    let chunks: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(chunks[0]["text"], "Alice likes green tea.");

    let output = run_cli(&temp_dir, &["migrate", "alice"])?;
    assert_success(&output, "migrate");
    assert!(String::from_utf8(output.stdout)?.contains("No legacy index"));

    let output = run_cli(&temp_dir, &["forget", "alice"])?;
    assert_success(&output, "forget");
    assert!(!temp_dir.path().join("alice/storage/retrieval.db").exists());
    Ok(())
}

/// Test that bad input fails with a readable error
#[test]
fn test_cli_error_handling() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    let output = run_cli(&temp_dir, &["query", "../etc", "passwd"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Error: Invalid agent id"));

    let config = temp_dir.path().join("memdex.toml");
    std::fs::write(&config, "[retrieval]\nchunk_size = 32\nchunk_overlap = 32\n")?;
    let output = run_cli(
        &temp_dir,
        &["--config", &config.to_string_lossy(), "status", "alice"],
    )?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Invalid configuration"));

    let output = run_cli(&temp_dir, &["query", "alice"])?;
    assert!(!output.status.success(), "query without text should fail");
    Ok(())
}
