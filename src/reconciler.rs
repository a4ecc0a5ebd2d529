//! Owner of the conversation log. All mutation goes through here; renderers
//! only ever see snapshots.
//!
//! Per-generation state machine: NoTurn -> Open (begin) -> Open (each
//! delta) -> Closed | Removed (finalize). A turn that accumulated no text
//! is removed instead of closed, so a failed generation leaves no empty
//! assistant bubble behind.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::types::{Role, SuggestedAction, Turn, TurnMetadata};

/// What `finalize_turn` did with the open turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The turn had text and is now immutable.
    Closed,
    /// The turn was empty and has been removed from the log.
    Removed,
    /// The id did not match the open turn; nothing was touched.
    Unknown,
}

struct LogState {
    turns: Vec<Turn>,
    open_turn_id: Option<String>,
}

/// Mediates all mutation of the append-ordered conversation log.
///
/// A single mutex guards the log and the open-turn marker together, so a
/// delta application is atomic with respect to concurrent snapshots, with no
/// torn reads of a turn's text.
pub struct ConversationReconciler {
    state: Mutex<LogState>,
}

impl ConversationReconciler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                turns: Vec::new(),
                open_turn_id: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an immutable user turn. Always succeeds.
    pub fn append_user(&self, text: impl Into<String>, model: Option<String>) -> Turn {
        let turn = Turn::user(text, model);
        self.lock().turns.push(turn.clone());
        turn
    }

    /// Append an immutable system turn (command output and the like).
    pub fn append_system(&self, text: impl Into<String>) -> Turn {
        let turn = Turn::system(text);
        self.lock().turns.push(turn.clone());
        turn
    }

    /// Append an empty assistant turn and mark it open.
    ///
    /// Errors if a turn is already open: the single-flight controller makes
    /// that unreachable in normal operation, so hitting it means a caller
    /// bug worth surfacing rather than silently closing the older turn.
    pub fn begin_assistant_turn(&self, model: impl Into<String>) -> anyhow::Result<Turn> {
        let mut state = self.lock();
        if let Some(open) = &state.open_turn_id {
            anyhow::bail!("assistant turn {} is still open", open);
        }
        let turn = Turn::assistant_placeholder(model);
        state.open_turn_id = Some(turn.id.clone());
        state.turns.push(turn.clone());
        Ok(turn)
    }

    /// Append `delta` to the open turn identified by `turn_id`.
    ///
    /// A stale or unknown id is a no-op; it must never mutate an
    /// unrelated turn.
    pub fn apply_delta(&self, turn_id: &str, delta: &str) {
        let mut state = self.lock();
        if state.open_turn_id.as_deref() != Some(turn_id) {
            warn!(turn_id, "Dropping delta for unknown or closed turn");
            return;
        }
        if let Some(turn) = state.turns.iter_mut().find(|t| t.id == turn_id) {
            turn.text.push_str(delta);
        }
    }

    /// Settle the open turn: remove it when empty, close it otherwise.
    /// Must run exactly once per generation, on every exit path.
    pub fn finalize_turn(&self, turn_id: &str) -> FinalizeOutcome {
        let mut state = self.lock();
        if state.open_turn_id.as_deref() != Some(turn_id) {
            warn!(turn_id, "Finalize for unknown or already-settled turn");
            return FinalizeOutcome::Unknown;
        }
        state.open_turn_id = None;

        let Some(idx) = state.turns.iter().position(|t| t.id == turn_id) else {
            return FinalizeOutcome::Unknown;
        };

        if state.turns[idx].text.trim().is_empty() {
            state.turns.remove(idx);
            debug!(turn_id, "Removed empty assistant turn");
            return FinalizeOutcome::Removed;
        }

        let has_code_block = state.turns[idx].text.contains("```");
        state.turns[idx].metadata = Some(TurnMetadata {
            has_code_block,
            suggested_action: has_code_block.then_some(SuggestedAction::ApplyFix),
        });
        FinalizeOutcome::Closed
    }

    /// Empty the log. Irreversible; confirmation is a UI concern.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.turns.clear();
        state.open_turn_id = None;
    }

    /// Point-in-time copy of the log, in display order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().turns.is_empty()
    }

    /// Replace the log wholesale (snapshot restore). Fails if a turn is open.
    pub fn restore(&self, turns: Vec<Turn>) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.open_turn_id.is_some() {
            anyhow::bail!("cannot restore while a generation is in flight");
        }
        state.turns = turns;
        Ok(())
    }
}

impl Default for ConversationReconciler {
    fn default() -> Self {
        Self::new()
    }
}
