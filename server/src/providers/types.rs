//! Provider result types

use serde::{Deserialize, Serialize};

/// Output of a transcription call
#[derive(Debug, Clone)]
pub struct TranscriptOutput {
    pub text: String,
    pub confidence: Option<f64>,
    pub model: String,
    pub processing_time_ms: i64,
    pub raw_response: Option<String>,
}

/// Output of a summarization call
#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub text: String,
    pub model: String,
    pub tokens_used: Option<i64>,
    pub processing_time_ms: i64,
    pub raw_response: Option<String>,
}

/// Structured result of analyzing one utterance chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutput {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_output_tolerates_missing_fields() {
        let parsed: AnalysisOutput = serde_json::from_str(r#"{"topics":["billing"]}"#).unwrap();
        assert_eq!(parsed.topics, vec!["billing"]);
        assert!(parsed.intents.is_empty());
        assert!(parsed.summary.is_empty());
    }
}
