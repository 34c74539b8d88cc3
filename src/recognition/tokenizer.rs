// Formula tokenizer: id table, special ids and byte-level detokenization
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::recognition::byte_level::ByteLevelCodec;
use crate::recognition::manifest::{read_json, ModelManifest};
use crate::types::{OcrError, Result};

/// Largest token id accepted from `tokenizer.json`. Real vocabularies are
/// far smaller; the id table is allocated densely up to the largest id.
pub const MAX_TOKEN_ID: usize = (1 << 22) - 1;

#[derive(Debug, Clone)]
pub struct Vocabulary {
    id_to_token: Vec<String>,
    special_ids: HashSet<i64>,
    uses_byte_level: bool,
}

impl Vocabulary {
    pub fn load(path: &Path, manifest: &ModelManifest) -> Result<Self> {
        let json: Value = read_json(path)?;
        let vocab = Self::from_json(&json, manifest)
            .map_err(|e| OcrError::model_init(format!("{} ({})", e.message(), path.display())))?;
        info!(
            tokens = vocab.len(),
            special = vocab.special_ids.len(),
            byte_level = vocab.uses_byte_level,
            "tokenizer loaded"
        );
        Ok(vocab)
    }

    /// Builds the table from a `tokenizer.json` document.
    pub fn from_json(json: &Value, manifest: &ModelManifest) -> Result<Self> {
        let vocab = json
            .get("model")
            .and_then(|m| m.get("vocab"))
            .ok_or_else(|| OcrError::model_init("tokenizer has no model.vocab"))?;

        let mut entries = parse_vocab(vocab)?;
        if entries.is_empty() {
            return Err(OcrError::model_init("tokenizer vocabulary is empty"));
        }

        let mut special_ids: HashSet<i64> = HashSet::new();
        if let Some(added) = json.get("added_tokens").and_then(Value::as_array) {
            for token in added {
                let Some(raw) = token.get("id") else {
                    continue;
                };
                let id = raw
                    .as_u64()
                    .ok_or_else(|| OcrError::model_init(format!("invalid added token id {}", raw)))
                    .and_then(|id| checked_id(id, "added token"))?;
                if token.get("special").and_then(Value::as_bool).unwrap_or(false) {
                    special_ids.insert(id as i64);
                }
                if let Some(content) = token.get("content").and_then(Value::as_str) {
                    entries.push((id, content.to_string()));
                }
            }
        }
        special_ids.extend(manifest.special_token_ids());

        let max_id = entries.iter().map(|(id, _)| *id).max().unwrap_or(0);
        let mut id_to_token = vec![String::new(); max_id + 1];
        for (id, token) in entries {
            // model vocabulary first, added tokens only fill gaps
            if id_to_token[id].is_empty() {
                id_to_token[id] = token;
            }
        }

        let uses_byte_level = json.get("decoder").map(declares_byte_level).unwrap_or(false);
        debug!(size = id_to_token.len(), "id table built");

        Ok(Self {
            id_to_token,
            special_ids,
            uses_byte_level,
        })
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn token(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.id_to_token.get(i))
            .map(String::as_str)
    }

    pub fn is_special(&self, id: i64) -> bool {
        self.special_ids.contains(&id)
    }

    pub fn uses_byte_level(&self) -> bool {
        self.uses_byte_level
    }

    /// Turns generated ids into text: specials and unknown ids are dropped,
    /// byte-level encoding is undone, line endings become `\n` and the
    /// result is trimmed.
    pub fn decode(&self, ids: &[i64]) -> String {
        let joined: String = ids
            .iter()
            .filter(|&&id| !self.is_special(id))
            .filter_map(|&id| self.token(id))
            .collect();

        let text = if self.uses_byte_level {
            ByteLevelCodec::shared().decode(&joined)
        } else {
            joined
        };

        normalize_newlines(&text).trim().to_string()
    }
}

fn parse_vocab(vocab: &Value) -> Result<Vec<(usize, String)>> {
    match vocab {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::Number(n) => n
                    .as_u64()
                    .ok_or_else(|| OcrError::model_init(format!("invalid id for token {:?}", key)))
                    .and_then(|id| checked_id(id, key))
                    .map(|id| (id, key.clone())),
                Value::String(token) => key
                    .parse::<u64>()
                    .map_err(|_| OcrError::model_init(format!("invalid vocabulary key {:?}", key)))
                    .and_then(|id| checked_id(id, token))
                    .map(|id| (id, token.clone())),
                _ => Err(OcrError::model_init(format!("invalid vocabulary entry {:?}", key))),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(id, item)| {
                let token = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Array(parts) => parts.first().and_then(Value::as_str),
                    _ => None,
                };
                token
                    .map(|t| (id, t.to_string()))
                    .ok_or_else(|| OcrError::model_init(format!("invalid vocabulary entry at index {}", id)))
            })
            .collect(),
        _ => Err(OcrError::model_init("model.vocab is neither a map nor a list")),
    }
}

fn checked_id(id: u64, token: &str) -> Result<usize> {
    usize::try_from(id)
        .ok()
        .filter(|&id| id <= MAX_TOKEN_ID)
        .ok_or_else(|| {
            OcrError::model_init(format!(
                "token id {} for {:?} exceeds the limit of {}",
                id, token, MAX_TOKEN_ID
            ))
        })
}

fn declares_byte_level(decoder: &Value) -> bool {
    match decoder.get("type").and_then(Value::as_str) {
        Some("ByteLevel") => true,
        Some("Sequence") => decoder
            .get("decoders")
            .and_then(Value::as_array)
            .map(|list| list.iter().any(declares_byte_level))
            .unwrap_or(false),
        _ => false,
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OcrErrorKind;
    use serde_json::json;

    fn eos_only_manifest() -> ModelManifest {
        ModelManifest {
            bos_token_id: 2,
            eos_token_id: 2,
            pad_token_id: 2,
            decoder_start_token_id: 2,
            ..ModelManifest::default()
        }
    }

    #[test]
    fn test_map_vocab_with_special_eos() {
        let json = json!({
            "model": { "vocab": { "a": 0, "b": 1, "</s>": 2 } },
            "added_tokens": [ { "id": 2, "content": "</s>", "special": true } ]
        });
        let vocab = Vocabulary::from_json(&json, &eos_only_manifest()).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.decode(&[2, 0, 1, 2]), "ab");
    }

    #[test]
    fn test_manifest_ids_always_special() {
        let json = json!({ "model": { "vocab": { "<s>": 0, "<pad>": 1, "</s>": 2, "x": 3 } } });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert!(vocab.is_special(0));
        assert!(vocab.is_special(1));
        assert!(vocab.is_special(2));
        assert_eq!(vocab.decode(&[2, 0, 3, 1, 3, 2]), "xx");
    }

    #[test]
    fn test_list_vocab_with_gaps_from_added_tokens() {
        let json = json!({
            "model": { "vocab": [["<s>", 0.0], ["<pad>", 0.0], ["</s>", 0.0], ["\\alpha", -1.5], "y"] },
            "added_tokens": [
                { "id": 9, "content": "<unk>", "special": true },
                { "id": 7, "content": "\\beta", "special": false }
            ]
        });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert_eq!(vocab.len(), 10);
        assert_eq!(vocab.token(3), Some("\\alpha"));
        assert_eq!(vocab.token(5), Some(""));
        assert_eq!(vocab.decode(&[2, 3, 4, 7, 9, 42, -1]), "\\alphay\\beta");
    }

    #[test]
    fn test_id_keyed_vocab() {
        let json = json!({ "model": { "vocab": { "3": "x", "4": "^2" } } });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert_eq!(vocab.decode(&[3, 4]), "x^2");
    }

    #[test]
    fn test_byte_level_decoding() {
        let json = json!({
            "model": { "vocab": { "<s>": 0, "<pad>": 1, "</s>": 2, "\\frac": 3, "Ġ{": 4, "a": 5, "}": 6, "Ċ": 7, "Î±": 8 } },
            "decoder": { "type": "ByteLevel" }
        });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert!(vocab.uses_byte_level());
        assert_eq!(vocab.decode(&[2, 3, 4, 5, 6, 2]), "\\frac {a}");
        assert_eq!(vocab.decode(&[7, 5, 7]), "a");
        assert_eq!(vocab.decode(&[8]), "α");
    }

    #[test]
    fn test_byte_level_inside_sequence_decoder() {
        let json = json!({
            "model": { "vocab": { "a": 3 } },
            "decoder": { "type": "Sequence", "decoders": [ { "type": "Replace" }, { "type": "ByteLevel" } ] }
        });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert!(vocab.uses_byte_level());
    }

    #[test]
    fn test_plain_text_newlines_normalized() {
        let json = json!({ "model": { "vocab": { "a": 3, "\r\n": 4, "\r": 5, " ": 6 } } });
        let vocab = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap();
        assert!(!vocab.uses_byte_level());
        assert_eq!(vocab.decode(&[6, 3, 4, 3, 5, 3, 6]), "a\na\na");
    }

    #[test]
    fn test_missing_vocab_fails_init() {
        for json in [json!({}), json!({ "model": {} }), json!({ "model": { "vocab": 5 } }), json!({ "model": { "vocab": {} } })] {
            let err = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap_err();
            assert_eq!(err.kind(), OcrErrorKind::ModelInitFailed);
        }
    }

    #[test]
    fn test_oversized_ids_fail_init() {
        let cases = [
            json!({ "model": { "vocab": { "a": u64::MAX } } }),
            json!({ "model": { "vocab": { "a": 1u64 << 40 } } }),
            json!({ "model": { "vocab": { "18446744073709551615": "a" } } }),
            json!({
                "model": { "vocab": { "a": 0 } },
                "added_tokens": [ { "id": u64::MAX, "content": "</s>", "special": true } ]
            }),
            json!({
                "model": { "vocab": { "a": 0 } },
                "added_tokens": [ { "id": -1, "content": "</s>", "special": true } ]
            }),
        ];
        for json in cases {
            let err = Vocabulary::from_json(&json, &ModelManifest::default()).unwrap_err();
            assert_eq!(err.kind(), OcrErrorKind::ModelInitFailed, "{}", json);
        }
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, r#"{"model": {"vocab": "oops"}}"#).unwrap();
        let err = Vocabulary::load(&path, &ModelManifest::default()).unwrap_err();
        assert_eq!(err.kind(), OcrErrorKind::ModelInitFailed);
        assert!(err.message().contains("tokenizer.json"));
    }
}
