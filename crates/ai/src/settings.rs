use serde::{Deserialize, Serialize};

/// Analysis parameters for a run.
///
/// Recorded in the ledger as an audit snapshot; the engine never enforces
/// them. Defaults match the service's documented CLI defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub language: String,
    /// Pages taken from the start of each document.
    pub initial_pages: u32,
    /// Pages taken from the end of each document.
    pub final_pages: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub model: Option<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            language: "es".to_string(),
            initial_pages: 2,
            final_pages: 2,
            max_tokens: 300,
            temperature: 0.1,
            top_p: 0.9,
            model: None,
        }
    }
}

impl AnalysisSettings {
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_pages(mut self, initial_pages: u32, final_pages: u32) -> Self {
        self.initial_pages = initial_pages;
        self.final_pages = final_pages;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// JSON snapshot stored in the ledger's `config` field.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_contains_every_setting() {
        let snapshot = AnalysisSettings::default().with_model("mistral-small").snapshot();
        assert_eq!(snapshot["language"], "es");
        assert_eq!(snapshot["initial_pages"], 2);
        assert_eq!(snapshot["final_pages"], 2);
        assert_eq!(snapshot["max_tokens"], 300);
        assert_eq!(snapshot["model"], "mistral-small");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: AnalysisSettings =
            serde_json::from_value(serde_json::json!({ "language": "en" })).unwrap();
        assert_eq!(settings.language, "en");
        assert_eq!(settings.max_tokens, 300);
    }
}
