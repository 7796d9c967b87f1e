//! Records carried by a streamed `/api/generate` response.

use serde::{Deserialize, Serialize};

/// One decoded line of a streaming generation.
///
/// Only the fields the client acts on are kept; the final record's timing
/// statistics and context vector are ignored.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    /// Model that produced the record.
    #[serde(default)]
    pub model: Option<String>,
    /// Incremental text fragment.
    #[serde(default)]
    pub response: Option<String>,
    /// Set on the final record.
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped (final record only).
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Error reported by the server mid-stream.
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// Text fragment of this record; missing fragments count as empty.
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.response.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fragment_is_empty() {
        let chunk: GenerateChunk = serde_json::from_str(r#"{"model":"m1","done":true}"#).unwrap();
        assert_eq!(chunk.fragment(), "");
        assert!(chunk.done);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let chunk: GenerateChunk = serde_json::from_str(
            r#"{"model":"m1","response":"Hi","done":false,"context":[1,2,3],"eval_count":4}"#,
        )
        .unwrap();
        assert_eq!(chunk.fragment(), "Hi");
        assert!(chunk.error.is_none());
    }
}
