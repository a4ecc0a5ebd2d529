//! Collaborator seams. The core modules only consume these;
//! implementations live at the edges: the binary's local adapters and
//! the test doubles.

use async_trait::async_trait;

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read-oriented access to the project tree.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file as text. Errors for missing or unreadable paths.
    async fn get(&self, path: &str) -> anyhow::Result<String>;

    async fn list(&self, dir: &str) -> anyhow::Result<Vec<FileEntry>>;

    async fn write(&self, path: &str, text: &str) -> anyhow::Result<()>;
}

/// Captured output of an externally executed command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Opaque command execution; the core only formats the captured output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> anyhow::Result<CommandOutput>;
}

/// Opaque key-value persistence with get/set semantics.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}
