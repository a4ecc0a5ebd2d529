//! Test doubles for the collaborator seams. Test-only.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::traits::{CommandOutput, CommandRunner, FileEntry, FileStore, KeyValueStore};

/// In-memory file store seeded with fixed contents.
#[derive(Default)]
pub struct StaticFileStore {
    files: Mutex<HashMap<String, String>>,
}

impl StaticFileStore {
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl FileStore for StaticFileStore {
    async fn get(&self, path: &str) -> anyhow::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such file: {}", path))
    }

    async fn list(&self, _dir: &str) -> anyhow::Result<Vec<FileEntry>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .map(|name| FileEntry {
                name: name.clone(),
                is_dir: false,
            })
            .collect())
    }

    async fn write(&self, path: &str, text: &str) -> anyhow::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), text.to_string());
        Ok(())
    }
}

/// Every operation fails, for exercising degraded paths.
pub struct FailingFileStore;

#[async_trait]
impl FileStore for FailingFileStore {
    async fn get(&self, path: &str) -> anyhow::Result<String> {
        anyhow::bail!("permission denied: {}", path)
    }

    async fn list(&self, dir: &str) -> anyhow::Result<Vec<FileEntry>> {
        anyhow::bail!("permission denied: {}", dir)
    }

    async fn write(&self, path: &str, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("permission denied: {}", path)
    }
}

/// Returns canned output for every command.
pub struct StaticRunner {
    stdout: String,
    stderr: String,
}

impl StaticRunner {
    pub fn new(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

#[async_trait]
impl CommandRunner for StaticRunner {
    async fn run(&self, _command: &str) -> anyhow::Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryKvStore {
    map: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
