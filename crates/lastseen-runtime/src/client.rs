//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("{}", format_rpc_error(error));
    }

    Ok(response["result"].clone())
}

pub async fn cmd_watch(socket_path: &str, user: &str, source: &str) -> anyhow::Result<()> {
    let subject = rpc_call(socket_path, "watch", json!({"user": user, "source": source})).await?;
    println!("watching {}", format_subject(&subject));
    Ok(())
}

pub async fn cmd_unwatch(socket_path: &str, user: &str, source: Option<&str>) -> anyhow::Result<()> {
    let removed = rpc_call(socket_path, "unwatch", json!({"user": user, "source": source})).await?;
    println!("removed {}", removed.as_u64().unwrap_or(0));
    Ok(())
}

pub async fn cmd_ls(socket_path: &str) -> anyhow::Result<()> {
    let watched = rpc_call(socket_path, "list_watched", Value::Null).await?;
    print!("{}", format_watched(&watched));
    Ok(())
}

pub async fn cmd_status(socket_path: &str, user: &str, source: Option<&str>) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "status", json!({"user": user, "source": source})).await?;
    let output = match source {
        Some(source) => format!(
            "{source}\t{}\n",
            result["observed_at"].as_str().unwrap_or("-")
        ),
        None => format_statuses(&result),
    };
    print!("{output}");
    Ok(())
}

pub async fn cmd_archive(socket_path: &str, users: &[String], sources: &[String]) -> anyhow::Result<()> {
    let records = rpc_call(socket_path, "archive", json!({"user": users, "source": sources})).await?;
    print!("{}", format_archive(&records));
    Ok(())
}

pub async fn cmd_record(
    socket_path: &str,
    user: &str,
    source: &str,
    at: Option<chrono::DateTime<chrono::Utc>>,
) -> anyhow::Result<()> {
    let record = rpc_call(
        socket_path,
        "record",
        json!({"user": user, "source": source, "timestamp": at}),
    )
    .await?;
    println!(
        "recorded #{} {}",
        record["id"],
        record["timestamp"].as_str().unwrap_or("-")
    );
    Ok(())
}

pub async fn cmd_sources(socket_path: &str) -> anyhow::Result<()> {
    let sources = rpc_call(socket_path, "list_sources", Value::Null).await?;
    for name in sources.as_array().into_iter().flatten() {
        println!("{}", name.as_str().unwrap_or_default());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting (pure, separated for testability)
// ---------------------------------------------------------------------------

pub(crate) fn format_rpc_error(error: &Value) -> String {
    let message = error["message"].as_str().unwrap_or("unknown error");
    match error["data"]["kind"].as_str() {
        Some(kind) => format!("{message} [{kind}]"),
        None => message.to_string(),
    }
}

fn format_subject(subject: &Value) -> String {
    format!(
        "{}@{}",
        subject["user"].as_str().unwrap_or("?"),
        subject["source"].as_str().unwrap_or("?")
    )
}

pub(crate) fn format_watched(watched: &Value) -> String {
    let Some(arr) = watched.as_array() else {
        return String::new();
    };
    if arr.is_empty() {
        return "(watch-list is empty)\n".to_string();
    }
    arr.iter().map(|s| format_subject(s) + "\n").collect()
}

pub(crate) fn format_statuses(statuses: &Value) -> String {
    let Some(map) = statuses.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(source, at)| format!("{source}\t{}\n", at.as_str().unwrap_or("-")))
        .collect()
}

pub(crate) fn format_archive(records: &Value) -> String {
    let Some(arr) = records.as_array() else {
        return String::new();
    };
    arr.iter()
        .map(|r| {
            format!(
                "{}\t{}\t{}\t{}\n",
                r["id"],
                r["timestamp"].as_str().unwrap_or("-"),
                r["user"].as_str().unwrap_or("?"),
                r["source"].as_str().unwrap_or("?"),
            )
        })
        .collect()
}
