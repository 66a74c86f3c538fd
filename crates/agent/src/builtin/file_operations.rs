use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::string_arg;
use crate::tools::{Tool, ToolErrorKind, ToolOutcome};

/// File access confined to a single workspace directory.
pub struct FileOperations {
    workspace: PathBuf,
}

impl FileOperations {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Only the final path component is honoured, so `../etc/passwd` resolves to `passwd`.
    fn resolve(&self, filename: &str) -> Option<(String, PathBuf)> {
        let name = Path::new(filename.trim()).file_name()?.to_str()?.to_string();
        let path = self.workspace.join(&name);
        Some((name, path))
    }

    async fn run(&self, arguments: &Map<String, Value>) -> Result<ToolOutcome, ToolOutcome> {
        let operation = string_arg(arguments, "operation")?;
        fs::create_dir_all(&self.workspace).await.map_err(unexpected)?;

        if operation == "list" {
            return self.list().await;
        }
        if !matches!(operation, "read" | "write" | "append" | "delete") {
            return Ok(ToolOutcome::error(
                ToolErrorKind::InvalidOperation,
                format!("Invalid operation '{operation}'. Use: read, write, append, list, delete"),
            ));
        }

        let filename = string_arg(arguments, "filename")?;
        let Some((name, path)) = self.resolve(filename) else {
            return Ok(ToolOutcome::error(
                ToolErrorKind::InvalidArguments,
                format!("Invalid filename '{filename}'"),
            ));
        };
        let content = arguments.get("content").and_then(Value::as_str).unwrap_or("");

        debug!(event_name = "tool.file_operations.started", operation, filename = %name, "file operation");
        match operation {
            "read" => match fs::read_to_string(&path).await {
                Ok(text) => Ok(ToolOutcome::success(json!({
                    "operation": "read",
                    "filename": name,
                    "size": text.len(),
                    "content": text,
                }))),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(not_found(&name)),
                Err(error) => Err(unexpected(error)),
            },
            "write" => {
                fs::write(&path, content).await.map_err(unexpected)?;
                Ok(ToolOutcome::success(json!({
                    "operation": "write",
                    "filename": name,
                    "size": content.len(),
                })))
            }
            "append" => {
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(unexpected)?;
                file.write_all(content.as_bytes()).await.map_err(unexpected)?;
                file.flush().await.map_err(unexpected)?;
                Ok(ToolOutcome::success(json!({"operation": "append", "filename": name})))
            }
            _ => match fs::remove_file(&path).await {
                Ok(()) => Ok(ToolOutcome::success(json!({"operation": "delete", "filename": name}))),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(not_found(&name)),
                Err(error) => Err(unexpected(error)),
            },
        }
    }

    async fn list(&self) -> Result<ToolOutcome, ToolOutcome> {
        let mut entries = fs::read_dir(&self.workspace).await.map_err(unexpected)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unexpected)? {
            if entry.file_type().await.map_err(unexpected)?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(ToolOutcome::success(json!({
            "operation": "list",
            "count": files.len(),
            "files": files,
        })))
    }
}

fn not_found(name: &str) -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::FileNotFound, format!("File '{name}' not found"))
}

fn unexpected(error: std::io::Error) -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::UnexpectedError, error.to_string())
}

#[async_trait]
impl Tool for FileOperations {
    fn name(&self) -> &'static str {
        "file_operations"
    }

    fn description(&self) -> &'static str {
        "Read, write, append, list or delete text files inside the agent workspace directory."
    }

    fn short_description(&self) -> &'static str {
        "Read, write, and manage files in the workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list", "delete"],
                    "description": "File operation to perform"
                },
                "filename": {"type": "string", "description": "Name of the file in the workspace"},
                "content": {"type": "string", "description": "Content for write and append"}
            },
            "required": ["operation", "filename"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        self.run(arguments).await.unwrap_or_else(|error| error)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::FileOperations;
    use crate::tools::Tool;

    async fn run(tool: &FileOperations, arguments: Value) -> Value {
        let arguments = arguments.as_object().cloned().unwrap_or_default();
        tool.execute(&arguments).await.to_value()
    }

    #[tokio::test]
    async fn write_read_append_list_delete_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = FileOperations::new(dir.path().join("workspace"));

        let written =
            run(&tool, json!({"operation": "write", "filename": "notes.txt", "content": "15"})).await;
        assert_eq!(written, json!({"status": "success", "operation": "write", "filename": "notes.txt", "size": 2}));

        run(&tool, json!({"operation": "append", "filename": "notes.txt", "content": "\nmore"})).await;
        let read = run(&tool, json!({"operation": "read", "filename": "notes.txt"})).await;
        assert_eq!(read["content"], "15\nmore");
        assert_eq!(read["size"], 7);

        let listed = run(&tool, json!({"operation": "list", "filename": ""})).await;
        assert_eq!(listed["files"], json!(["notes.txt"]));
        assert_eq!(listed["count"], 1);

        let deleted = run(&tool, json!({"operation": "delete", "filename": "notes.txt"})).await;
        assert_eq!(deleted["status"], "success");
        let missing = run(&tool, json!({"operation": "read", "filename": "notes.txt"})).await;
        assert_eq!(missing["error_type"], "file_not_found");
        assert_eq!(missing["message"], "File 'notes.txt' not found");
    }

    #[tokio::test]
    async fn paths_are_confined_to_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("workspace");
        let tool = FileOperations::new(&workspace);

        run(&tool, json!({"operation": "write", "filename": "../escape.txt", "content": "x"})).await;
        assert!(workspace.join("escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = FileOperations::new(dir.path());
        let value = run(&tool, json!({"operation": "chmod", "filename": "a"})).await;
        assert_eq!(value["error_type"], "invalid_operation");
    }
}
