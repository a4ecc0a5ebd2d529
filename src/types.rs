use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// Command output and other machine-generated notices.
    System,
}

/// Follow-up action the UI can offer for a finished assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// The turn contains a fenced code block the user may want to apply.
    ApplyFix,
}

/// Derived facts about a finalized assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub has_code_block: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suggested_action: Option<SuggestedAction>,
}

/// One entry in the conversation log.
///
/// `id` is immutable and unique within a session. Only the text of the
/// single open assistant turn is ever mutated after creation, and only by
/// the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<TurnMetadata>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>, model: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            model,
            metadata: None,
        }
    }

    pub fn user(text: impl Into<String>, model: Option<String>) -> Self {
        Self::new(Role::User, text, model)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text, None)
    }

    /// Empty assistant turn, appended before the first delta arrives.
    pub fn assistant_placeholder(model: impl Into<String>) -> Self {
        Self::new(Role::Assistant, String::new(), Some(model.into()))
    }
}

/// Sampling parameters forwarded verbatim to the inference server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_predict: Option<u32>,
}

/// A streaming generation request. Immutable once sent.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "SamplingOptions::is_empty")]
    pub options: SamplingOptions,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
            options: SamplingOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = options;
        self
    }
}

impl SamplingOptions {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A model advertised by the inference server.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_omits_default_options() {
        let req = GenerateRequest::new("llama3", "hello");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("options").is_none());
        assert_eq!(json["stream"], serde_json::json!(true));
    }

    #[test]
    fn generate_request_serializes_set_options() {
        let req = GenerateRequest::new("llama3", "hello").with_options(SamplingOptions {
            temperature: Some(0.2),
            ..Default::default()
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["options"]["temperature"], serde_json::json!(0.2));
        assert!(json["options"].get("top_p").is_none());
    }

    #[test]
    fn turn_roundtrips_through_json() {
        let mut turn = Turn::user("fix the bug", Some("llama3".to_string()));
        turn.metadata = Some(TurnMetadata {
            has_code_block: false,
            suggested_action: None,
        });
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(turn, back);
    }

    #[test]
    fn turn_ids_are_unique() {
        let a = Turn::system("out");
        let b = Turn::system("out");
        assert_ne!(a.id, b.id);
    }
}
