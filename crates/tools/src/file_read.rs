//! File read tool — read UTF-8 file contents, optionally capped.

use async_trait::async_trait;
use socmate_core::error::ToolError;
use socmate_core::tool::Tool;

pub struct FileReadTool {
    /// Files longer than this are cut at the nearest char boundary below it.
    pub max_bytes: Option<usize>,
}

impl FileReadTool {
    /// Create a file read tool with no size cap.
    pub fn new() -> Self {
        Self { max_bytes: None }
    }

    /// Create a file read tool that truncates output after `max_bytes`.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(mut content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }
    let total = content.len();
    let mut cut = max_bytes;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    content.push_str(&format!("\n... (truncated, {total} bytes total)"));
    content
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file (RTL, constraints, logs, reports) at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("Failed to read {path}: {e}"),
            })?;

        let content = String::from_utf8(bytes).map_err(|_| ToolError::ExecutionFailed {
            tool_name: "file_read".into(),
            reason: format!("{path} is not valid UTF-8"),
        })?;

        Ok(match self.max_bytes {
            Some(max) => truncate(content, max),
            None => content,
        })
    }
}
