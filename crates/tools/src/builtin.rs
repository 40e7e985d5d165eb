//! Built-in tools available to every agent.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use pg_domain::error::{Error, Result};

use crate::registry::ToolSpec;

/// Max bytes `read_file` will return.
const READ_FILE_CAP: u64 = 256 * 1024;

/// The default tool set: wall clock + allow-listed file reads.
pub fn default_tools(allowed_paths: &[PathBuf]) -> Vec<ToolSpec> {
    vec![current_time(), read_file(allowed_paths.to_vec())]
}

/// `current_time` — RFC 3339 UTC timestamp.
pub fn current_time() -> ToolSpec {
    ToolSpec::from_fn(
        "current_time",
        "Get the current date and time (UTC, RFC 3339).",
        serde_json::json!({ "type": "object", "properties": {} }),
        |_args, _ctx| async {
            Ok(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
        },
    )
}

/// `read_file` — read a UTF-8 file under one of the allowed paths.
pub fn read_file(allowed_paths: Vec<PathBuf>) -> ToolSpec {
    ToolSpec::from_fn(
        "read_file",
        "Read a UTF-8 text file. Only paths under tools.allowed_paths are accessible.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path of the file to read" }
            },
            "required": ["path"]
        }),
        move |args, _ctx| {
            let allowed = allowed_paths.clone();
            async move {
                let path = args
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Tool("missing 'path' argument".into()))?;
                let resolved = resolve_allowed(Path::new(path), &allowed)?;

                let meta = std::fs::metadata(&resolved)
                    .map_err(|e| Error::Tool(format!("{path}: {e}")))?;
                if meta.len() > READ_FILE_CAP {
                    return Err(Error::Tool(format!(
                        "{path}: file exceeds {READ_FILE_CAP} bytes"
                    )));
                }

                let content = std::fs::read_to_string(&resolved)
                    .map_err(|e| Error::Tool(format!("{path}: {e}")))?;
                Ok(Value::String(content))
            }
        },
    )
}

/// Canonicalise and verify the path sits under an allowed root.
fn resolve_allowed(path: &Path, allowed: &[PathBuf]) -> Result<PathBuf> {
    let resolved = path
        .canonicalize()
        .map_err(|e| Error::Tool(format!("{}: {e}", path.display())))?;

    let permitted = allowed.iter().any(|root| {
        root.canonicalize()
            .map(|root| resolved.starts_with(&root))
            .unwrap_or(false)
    });
    if !permitted {
        return Err(Error::Tool(format!(
            "{}: path is outside tools.allowed_paths",
            path.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolContext;

    #[tokio::test]
    async fn current_time_is_rfc3339() {
        let spec = current_time();
        let out = spec
            .handler
            .call(serde_json::json!({}), ToolContext::default())
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }

    #[tokio::test]
    async fn read_file_within_allowed_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "remember the milk").unwrap();

        let spec = read_file(vec![dir.path().to_path_buf()]);
        let out = spec
            .handler
            .call(
                serde_json::json!({ "path": file.to_str().unwrap() }),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.as_str().unwrap(), "remember the milk");
    }

    #[tokio::test]
    async fn read_file_outside_allowed_root_is_rejected() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("secret.txt");
        std::fs::write(&file, "nope").unwrap();

        let spec = read_file(vec![allowed.path().to_path_buf()]);
        let err = spec
            .handler
            .call(
                serde_json::json!({ "path": file.to_str().unwrap() }),
                ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("allowed_paths"));
    }

    #[tokio::test]
    async fn read_file_with_empty_allow_list_rejects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "x").unwrap();

        let spec = read_file(Vec::new());
        assert!(spec
            .handler
            .call(
                serde_json::json!({ "path": file.to_str().unwrap() }),
                ToolContext::default(),
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn read_file_requires_path_argument() {
        let spec = read_file(Vec::new());
        let err = spec
            .handler
            .call(serde_json::json!({}), ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
