//! Built-in tool implementations for socmate.
//!
//! Tools give the agent the ability to act on a design workspace: run
//! shell commands (simulators, synthesis scripts, git) and read files.
//! Domain tools such as netlist managers register alongside these.

pub mod file_read;
pub mod shell;

use socmate_core::tool::ToolRegistry;

/// Commands the default shell tool accepts.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "echo", "pwd", "wc", "grep", "find", "diff", "git", "make",
    "iverilog", "vvp", "verilator", "yosys", "sby", "python", "python3",
];

/// Create a default tool registry with all built-in tools.
///
/// Security defaults:
/// - Shell: only common read-only and EDA commands
/// - File read: capped at 256 KiB per call
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let safe_commands = SAFE_COMMANDS.iter().map(|c| c.to_string()).collect();
    registry.register(Box::new(shell::ShellTool::new(safe_commands)));
    registry.register(Box::new(file_read::FileReadTool::with_max_bytes(256 * 1024)));
    registry
}
