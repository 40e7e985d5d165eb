//! The session store: one append-only `current.jsonl` plus timestamped
//! archives produced by compaction.
//!
//! Every message is one JSON line. Loading reconstructs `Message`s,
//! injects wall-clock prefixes into user/tool rows, and repairs tool
//! calls left dangling by a crash so the history stays well-formed for
//! the next LLM call.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use pg_domain::error::{Error, Result};
use pg_domain::message::{Message, Role, ToolCall};
use pg_domain::trace::TraceEvent;

use crate::tokens::TokenCounter;

/// Content of a tool result synthesised for a call that never completed.
pub const CANCELLED_TOOL_RESULT: &str = r#"{"cancelled":true,"reason":"process restarted"}"#;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry (on disk)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single JSONL row of the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Milliseconds since epoch.
    pub ts: i64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SessionEntry {
    fn from_message(message: &Message, metadata: Option<serde_json::Value>) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            role: message.role,
            content: message.content.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.clone(),
            metadata,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only JSONL session log rooted in a data directory.
pub struct SessionStore {
    dir: PathBuf,
    /// Serialises appends and compaction (one writer at a time).
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(Error::Io)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join("current.jsonl")
    }

    /// Append one message as a single JSON line, flushed before return.
    pub fn append(&self, message: &Message, metadata: Option<serde_json::Value>) -> Result<()> {
        let entry = SessionEntry::from_message(message, metadata);
        let json = serde_json::to_string(&entry)?;

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;

        TraceEvent::SessionAppend { entries: 1 }.emit();
        Ok(())
    }

    /// Read the raw entries of `current.jsonl`. Malformed lines are
    /// skipped with a warning.
    pub fn read_entries(&self) -> Result<Vec<SessionEntry>> {
        read_entries_at(&self.current_path())
    }

    /// Load the current session as ordered messages.
    ///
    /// User and tool rows that lack a `[YYYY-MM-DD HH:MM:SS]` prefix get
    /// one injected from their timestamp, then the tool-call repair pass
    /// runs (see [`repair_tool_calls`]).
    pub fn load(&self) -> Result<Vec<Message>> {
        let entries = self.read_entries()?;
        let mut messages = Vec::with_capacity(entries.len());

        for entry in entries {
            let content = match entry.role {
                Role::User | Role::Tool if !has_timestamp_prefix(&entry.content) => {
                    format!("{}{}", timestamp_prefix(entry.ts), entry.content)
                }
                _ => entry.content,
            };
            messages.push(Message {
                role: entry.role,
                content,
                tool_call_id: entry.tool_call_id,
                tool_calls: entry.tool_calls,
            });
        }

        repair_tool_calls(&mut messages);
        Ok(messages)
    }

    /// Roll `current.jsonl` into a timestamped archive and seed a new
    /// log containing exactly one system message with the summary.
    ///
    /// Returns the archive name (`YYYYMMDDTHHMMSS.jsonl`, lexicographic
    /// order == chronological order).
    pub fn compact(&self, summary: &str, prev: Option<&str>) -> Result<String> {
        let _guard = self.write_lock.lock();

        let current = self.current_path();
        if !current.exists() {
            return Err(Error::InvalidState("no session log to compact".into()));
        }

        let archive_name = format!("{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S"));
        let archive_path = self.dir.join(&archive_name);
        if archive_path.exists() {
            return Err(Error::InvalidState(format!(
                "archive {archive_name} already exists"
            )));
        }

        let archived_entries = read_entries_at(&current).map(|e| e.len()).unwrap_or(0);
        fs::rename(&current, &archive_path).map_err(Error::Io)?;

        let mut metadata = serde_json::json!({ "archive": archive_name });
        if let Some(prev) = prev {
            metadata["prev"] = serde_json::json!(prev);
        }
        let entry = SessionEntry {
            ts: Utc::now().timestamp_millis(),
            role: Role::System,
            content: summary.to_owned(),
            tool_call_id: None,
            tool_calls: None,
            metadata: Some(metadata),
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = fs::File::create(&current).map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;

        TraceEvent::SessionCompacted {
            archive: archive_name.clone(),
            entries: archived_entries,
        }
        .emit();

        Ok(archive_name)
    }

    /// Archive names in lexicographic (== chronological) order.
    pub fn list_archives(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.dir).map_err(Error::Io)? {
            let dir_entry = dir_entry.map_err(Error::Io)?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if is_archive_name(&name) {
                names.push(name.into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read the entries of one archive.
    pub fn read_archive(&self, name: &str) -> Result<Vec<SessionEntry>> {
        read_entries_at(&self.dir.join(name))
    }

    /// Estimate the token cost of a message sequence: message text plus
    /// embedded tool-call JSON, delegated to the injected counter.
    pub fn estimate_tokens(messages: &[Message], counter: &dyn TokenCounter) -> usize {
        let mut text = String::new();
        for message in messages {
            text.push_str(&message.content);
            text.push('\n');
            if let Some(calls) = &message.tool_calls {
                if let Ok(json) = serde_json::to_string(calls) {
                    text.push_str(&json);
                    text.push('\n');
                }
            }
        }
        counter.count(&text)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call repair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Close any tool calls left dangling by a crash.
///
/// For every assistant message bearing tool calls, each call id must
/// have a later matching tool-result; ids without one get a synthetic
/// cancelled result appended. In practice only the final round can be
/// broken (the acting path appends each result before announcing
/// completion), but the scan covers the whole history so a loaded file
/// is always well-formed.
pub fn repair_tool_calls(messages: &mut Vec<Message>) {
    let mut open_ids: Vec<String> = Vec::new();
    for (idx, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant {
            continue;
        }
        for id in message.tool_call_ids() {
            let answered = messages[idx + 1..]
                .iter()
                .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(id));
            if !answered {
                open_ids.push(id.to_owned());
            }
        }
    }

    for id in open_ids {
        tracing::warn!(call_id = %id, "synthesising cancelled tool result");
        messages.push(Message::tool_result(id, CANCELLED_TOOL_RESULT));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn read_entries_at(path: &Path) -> Result<Vec<SessionEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path).map_err(Error::Io)?;
    let mut entries = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping malformed session line"
                );
            }
        }
    }
    Ok(entries)
}

/// `[YYYY-MM-DD HH:MM:SS]` at the start of the content.
fn has_timestamp_prefix(content: &str) -> bool {
    let b = content.as_bytes();
    if b.len() < 21 || b[0] != b'[' || b[20] != b']' {
        return false;
    }
    let digits = [1, 2, 3, 4, 6, 7, 9, 10, 12, 13, 15, 16, 18, 19];
    digits.iter().all(|&i| b[i].is_ascii_digit())
        && b[5] == b'-'
        && b[8] == b'-'
        && b[11] == b' '
        && b[14] == b':'
        && b[17] == b':'
}

fn timestamp_prefix(ts_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => format!("[{}] ", dt.format("%Y-%m-%d %H:%M:%S")),
        None => String::new(),
    }
}

/// `YYYYMMDDTHHMMSS.jsonl`
fn is_archive_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".jsonl") else {
        return false;
    };
    let b = stem.as_bytes();
    b.len() == 15
        && b[8] == b'T'
        && b[..8].iter().all(u8::is_ascii_digit)
        && b[9..].iter().all(u8::is_ascii_digit)
}
