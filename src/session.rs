//! Wires the composer, stream controller, and reconciler into one
//! explicit context object: the single place that drives a generation
//! from user text to a settled conversation log.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::prompt::{self, ContextFile};
use crate::reconciler::{ConversationReconciler, FinalizeOutcome};
use crate::stream::StreamController;
use crate::traits::{CommandRunner, FileStore, KeyValueStore};
use crate::types::{GenerateRequest, Role, SamplingOptions, Turn};

pub struct Session {
    model: String,
    sampling: SamplingOptions,
    conversation_key: String,
    controller: StreamController,
    reconciler: Arc<ConversationReconciler>,
    files: Arc<dyn FileStore>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn KeyValueStore>,
    /// Token for the generation currently in flight, if any.
    cancel: Mutex<CancellationToken>,
}

impl Session {
    pub fn new(
        config: &AppConfig,
        files: Arc<dyn FileStore>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let controller = StreamController::new(
            &config.server.base_url,
            std::time::Duration::from_secs(config.server.connect_timeout_secs),
            std::time::Duration::from_secs(config.server.request_timeout_secs),
        )?;
        Ok(Self {
            model: config.server.model.clone(),
            sampling: config.sampling.clone(),
            conversation_key: config.state.conversation_key.clone(),
            controller,
            reconciler: Arc::new(ConversationReconciler::new()),
            files,
            runner,
            store,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn reconciler(&self) -> Arc<ConversationReconciler> {
        self.reconciler.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.controller.is_in_flight()
    }

    /// Switch the model used for subsequent generations.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Cancel the in-flight generation, if any. Cooperative: observed at
    /// the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    /// Run one full generation: append the user turn, stream the reply
    /// into an assistant turn, and settle the log on every exit path.
    ///
    /// Returns the finalized assistant turn, or `None` when the generation
    /// was cancelled before any text arrived (the placeholder is rolled
    /// back, not kept as an empty bubble).
    pub async fn send_message(
        &self,
        text: &str,
        context_paths: &[String],
    ) -> anyhow::Result<Option<Turn>> {
        let file_context = self.read_context_files(context_paths).await;
        let prior = self.reconciler.snapshot();
        self.reconciler.append_user(text, Some(self.model.clone()));

        let prompt = prompt::compose(text, &prior, &file_context);
        let request = GenerateRequest::new(self.model.clone(), prompt)
            .with_options(self.sampling.clone());

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();

        let mut stream = match self.controller.generate(&request, token).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Generation failed to start");
                anyhow::bail!(e.user_message());
            }
        };

        let open = self.reconciler.begin_assistant_turn(self.model.clone())?;

        // Deltas are applied in decoder order; the loop result decides how
        // to report, but finalize runs regardless.
        let result = loop {
            match stream.next_token().await {
                Some(Ok(delta)) => self.reconciler.apply_delta(&open.id, &delta),
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };
        let outcome = self.reconciler.finalize_turn(&open.id);

        match result {
            Ok(()) => {
                if outcome == FinalizeOutcome::Removed {
                    info!(turn_id = %open.id, "Generation cancelled before any text arrived");
                    return Ok(None);
                }
                let turn = self
                    .reconciler
                    .snapshot()
                    .into_iter()
                    .find(|t| t.id == open.id)
                    .ok_or_else(|| anyhow::anyhow!("finalized turn missing from log"))?;
                Ok(Some(turn))
            }
            Err(e) => {
                error!(error = %e, turn_id = %open.id, "Generation failed");
                anyhow::bail!(e.user_message());
            }
        }
    }

    /// Read the caller-selected context files. A failed read becomes an
    /// inline note so the model still sees which file was intended.
    async fn read_context_files(&self, paths: &[String]) -> Vec<ContextFile> {
        let mut context = Vec::with_capacity(paths.len());
        for path in paths {
            let content = match self.files.get(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to read context file");
                    format!("Error reading {}: {}", path, e)
                }
            };
            context.push(ContextFile {
                name: path.clone(),
                content,
            });
        }
        context
    }

    /// Execute a command through the collaborator and record its captured
    /// output as a system turn.
    pub async fn run_command(&self, command: &str) -> anyhow::Result<Turn> {
        let output = self.runner.run(command).await?;
        let mut text = format!("$ {}\n{}", command, output.stdout);
        if !output.stderr.is_empty() {
            text.push_str(&format!("\n[stderr]\n{}", output.stderr));
        }
        Ok(self.reconciler.append_system(text))
    }

    /// Write the code block from the most recent assistant suggestion to
    /// `path` through the file collaborator.
    pub async fn apply_last_code_block(&self, path: &str) -> anyhow::Result<()> {
        let snapshot = self.reconciler.snapshot();
        let block = snapshot
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant)
            .find_map(|t| extract_code_block(&t.text))
            .ok_or_else(|| anyhow::anyhow!("no assistant response contains a code block"))?;
        self.files.write(path, &block).await?;
        info!(path = %path, "Applied suggested code block");
        Ok(())
    }

    /// Persist the conversation snapshot through the key-value collaborator.
    pub async fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.reconciler.snapshot();
        let json = serde_json::to_string(&snapshot)?;
        self.store.set(&self.conversation_key, &json).await
    }

    /// Restore a previously saved conversation; an absent key is an empty log.
    pub async fn restore(&self) -> anyhow::Result<()> {
        let turns: Vec<Turn> = match self.store.get(&self.conversation_key).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        self.reconciler.restore(turns)
    }

    /// Drop the whole conversation. Confirmation is the UI's problem.
    pub fn clear(&self) {
        self.reconciler.clear();
    }
}

/// First fenced block in `text`, without the fence lines. The opening
/// fence may carry a language tag.
fn extract_code_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body = &after_fence[after_fence.find('\n')? + 1..];
    let end = body.find("```")?;
    Some(body[..end].to_string())
}
