//! Prompt assembly: linear transcript plus optional file-context block,
//! adapted by a fixed-priority keyword intent classifier.
//!
//! The classifier is intentionally simplistic (case-insensitive substring
//! match, first category wins). It is a fixed rule list, not a general
//! classifier. Keep it that way.

use crate::types::{Role, Turn};

/// A project file supplied by the caller as model context.
///
/// Which files to include is the caller's decision; the core does not infer
/// paths from free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    pub name: String,
    pub content: String,
}

/// Detected task intent, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Fix,
    Test,
    Build,
}

const FIX_KEYWORDS: &[&str] = &["fix", "repair"];
const TEST_KEYWORDS: &[&str] = &["test"];
const BUILD_KEYWORDS: &[&str] = &["build"];

/// Classify the raw user text. Priority: fix > test > build > none.
pub fn classify_intent(user_text: &str) -> Option<Intent> {
    let lower = user_text.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if matches_any(FIX_KEYWORDS) {
        Some(Intent::Fix)
    } else if matches_any(TEST_KEYWORDS) {
        Some(Intent::Test)
    } else if matches_any(BUILD_KEYWORDS) {
        Some(Intent::Build)
    } else {
        None
    }
}

impl Intent {
    /// Instruction prepended to the transcript to steer the model.
    fn instruction(self) -> &'static str {
        match self {
            Intent::Fix => {
                "Analyze the code and produce a corrected version. \
                 Respond with the new code in a fenced markdown block."
            }
            Intent::Test => "Suggest or help with tests for the user's code.",
            Intent::Build => "Suggest commands to build the project.",
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "Human",
        Role::Assistant => "Assistant",
        Role::System => "System",
    }
}

/// Build the final prompt text for one generation.
///
/// Prior turns are rendered in log order; the model depends on that
/// ordering for coherent context. Pure: no I/O, inputs untouched.
pub fn compose(user_text: &str, prior_turns: &[Turn], file_context: &[ContextFile]) -> String {
    let mut prompt = String::new();

    if !file_context.is_empty() {
        let blocks: Vec<String> = file_context
            .iter()
            .map(|f| format!("--- {} ---\n{}\n", f.name, f.content))
            .collect();
        prompt.push_str(&format!(
            "Context: The user has provided the following project files for reference:\n{}\n\n",
            blocks.join("\n")
        ));
    }

    prompt.push_str("Conversation:\n");
    for turn in prior_turns {
        prompt.push_str(&format!("{}: {}\n", role_label(turn.role), turn.text));
    }
    prompt.push_str(&format!("Human: {}\n", user_text));
    prompt.push_str("Assistant:");

    match classify_intent(user_text) {
        Some(intent) => format!("{}\n\n{}", intent.instruction(), prompt),
        None => prompt,
    }
}
