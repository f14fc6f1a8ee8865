//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a design: read and
//! write files, run simulators, query documentation, drive netlist managers.
//! The agent core only ever sees them through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::ToolCall;

/// A tool definition sent to the LLM so it knows what tools it can call.
///
/// Serializes as the OpenAI-compatible
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolDefinition", into = "WireToolDefinition")]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolDefinition {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionDefinition,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionDefinition {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

impl From<WireToolDefinition> for ToolDefinition {
    fn from(wire: WireToolDefinition) -> Self {
        Self {
            name: wire.function.name,
            description: wire.function.description,
            parameters: wire.function.parameters,
        }
    }
}

impl From<ToolDefinition> for WireToolDefinition {
    fn from(def: ToolDefinition) -> Self {
        Self {
            kind: "function".into(),
            function: WireFunctionDefinition {
                name: def.name,
                description: def.description,
                parameters: def.parameters,
            },
        }
    }
}

/// The core Tool trait.
///
/// Tools may block for as long as their work takes; the registry does not
/// time-bound them, so any timeout policy belongs to the tool itself.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments and return its textual output.
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Ask a running execution to stop. Cooperative: tools may ignore it.
    /// Must not block.
    fn abort(&self) {}

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Parse the raw argument text of a tool call.
///
/// Models commonly send an empty string for tools without parameters; that
/// is read as `{}`.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidJson(e.to_string()))
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
/// 3. Fan an abort out to every tool
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name,
    /// keeping its position in the advertised order.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name.
    ///
    /// Never fails: unknown tools and tool errors come back as `Error: ...`
    /// text so the model can read them and recover.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> String {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return format!("Error: {}", ToolError::NotFound(name.to_string()));
        };

        debug!(tool = %name, "Executing tool");
        match tool.execute(arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                format!("Error: {e}")
            }
        }
    }

    /// Parse a model-issued call's arguments and execute it.
    ///
    /// Malformed arguments are reported without running the tool.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        match parse_arguments(&call.arguments) {
            Ok(arguments) => self.execute(&call.name, arguments).await,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Rejected tool call with malformed arguments");
                format!("Error: {e}")
            }
        }
    }

    /// Ask every registered tool to abort. Idempotent and non-blocking.
    pub fn abort_all(&self) {
        for tool in &self.tools {
            tool.abort();
        }
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            arguments["text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))
        }
    }

    struct NamedTool {
        name: &'static str,
        description: &'static str,
        aborts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { self.description }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(self.description.to_string())
        }
        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn named(name: &'static str, description: &'static str, aborts: &Arc<AtomicUsize>) -> Box<dyn Tool> {
        Box::new(NamedTool { name, description, aborts: aborts.clone() })
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn definitions_use_openai_function_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let value = serde_json::to_value(&defs).unwrap();
        assert_eq!(value[0]["type"], "function");
        assert_eq!(value[0]["function"]["name"], "echo");
        assert_eq!(value[0]["function"]["parameters"]["required"][0], "text");
    }

    #[test]
    fn last_registration_wins_and_order_is_stable() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(named("netlist", "v1", &aborts));
        registry.register(named("docs", "docs", &aborts));
        registry.register(named("netlist", "v2", &aborts));

        assert_eq!(registry.names(), vec!["netlist", "docs"]);
        assert_eq!(registry.get("netlist").unwrap().description(), "v2");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let output = registry
            .execute("echo", serde_json::json!({"text": "hello world"}))
            .await;
        assert_eq!(output, "hello world");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_raised() {
        let registry = ToolRegistry::new();
        let output = registry.execute("nonexistent", serde_json::json!({})).await;
        assert!(output.starts_with("Error:"));
        assert!(output.contains("not found"));
    }

    #[tokio::test]
    async fn tool_errors_become_error_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let output = registry.execute("echo", serde_json::json!({})).await;
        assert_eq!(output, "Error: Invalid tool arguments: Missing 'text' argument");
    }

    #[tokio::test]
    async fn dispatch_rejects_malformed_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let call = ToolCall::new("call_1", "echo", "{not json");
        let output = registry.dispatch(&call).await;
        assert!(output.starts_with("Error: Invalid JSON arguments - "));
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        assert_eq!(parse_arguments("  ").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn abort_all_reaches_every_tool_and_is_idempotent() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(named("a", "a", &aborts));
        registry.register(named("b", "b", &aborts));
        registry.abort_all();
        registry.abort_all();
        assert_eq!(aborts.load(Ordering::SeqCst), 4);
    }
}
