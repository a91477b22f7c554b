//! Detection Heuristics
//!
//! Pure predicates that classify one representative dataset record against
//! the shapes the recommender knows how to reformat. Key matching for the
//! QA shape is substring based over lower-cased keys, so unrelated fields
//! that happen to contain a synonym can produce false positives.

use serde_json::{Map, Value};

/// One dataset record
pub type Sample = Map<String, Value>;

pub const DEFAULT_QA_INPUT_KEYS: &[&str] = &["instruction", "prompt", "question", "input", "query", "source"];
pub const DEFAULT_QA_OUTPUT_KEYS: &[&str] = &["output", "answer", "response", "label", "target", "completion"];
pub const DEFAULT_CHAT_KEYS: &[&str] = &["messages", "conversations", "dialogues", "chat", "turns"];
pub const DEFAULT_ROLE_KEYS: &[&str] = &["role"];
pub const DEFAULT_CONTENT_KEYS: &[&str] = &["content"];
pub const DEFAULT_TOKENIZED_KEYS: &[&str] = &["input_ids", "labels", "attention_mask"];

pub(crate) fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// A recognised structural pattern in a dataset record
pub trait Shape: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_shape(&self, sample: &Sample) -> bool;
}

/// Keys of `sample` matching any needle, grouped by needle priority.
pub fn keys_containing<'a>(sample: &'a Sample, needles: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
    needles.iter().flat_map(move |needle| {
        let needle = needle.to_lowercase();
        sample
            .keys()
            .filter(move |key| key.to_lowercase().contains(&needle))
            .map(String::as_str)
    })
}

/// Plain prompt/response records
#[derive(Debug, Clone)]
pub struct QaShape {
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

impl QaShape {
    pub fn new(input_keys: Vec<String>, output_keys: Vec<String>) -> Self {
        Self { input_keys, output_keys }
    }

    /// The (input, response) column pair: the highest-priority input key
    /// that can be paired with a distinct response key.
    pub fn columns(&self, sample: &Sample) -> Option<(String, String)> {
        keys_containing(sample, &self.input_keys).find_map(|input| {
            keys_containing(sample, &self.output_keys)
                .find(|output| *output != input)
                .map(|output| (input.to_string(), output.to_string()))
        })
    }
}

impl Default for QaShape {
    fn default() -> Self {
        Self::new(owned(DEFAULT_QA_INPUT_KEYS), owned(DEFAULT_QA_OUTPUT_KEYS))
    }
}

impl Shape for QaShape {
    fn name(&self) -> &'static str {
        "qa"
    }

    /// Both synonym sets must match, and on two different keys.
    fn is_shape(&self, sample: &Sample) -> bool {
        self.columns(sample).is_some()
    }
}

/// Multi-turn conversation records
#[derive(Debug, Clone)]
pub struct ChatShape {
    conversation_keys: Vec<String>,
    role_keys: Vec<String>,
    content_keys: Vec<String>,
}

impl ChatShape {
    pub fn new(conversation_keys: Vec<String>, role_keys: Vec<String>, content_keys: Vec<String>) -> Self {
        Self {
            conversation_keys,
            role_keys,
            content_keys,
        }
    }

    /// First candidate key whose value fully validates as a conversation.
    /// The returned name is always a literal key of `sample`.
    pub fn conversation_key<'a>(&self, sample: &'a Sample) -> Option<&'a str> {
        self.conversation_keys.iter().find_map(|candidate| {
            let value = sample.get(candidate.as_str())?;
            if !self.is_conversation(value) {
                return None;
            }
            sample.keys().find(|key| key.as_str() == candidate.as_str()).map(String::as_str)
        })
    }

    fn is_conversation(&self, value: &Value) -> bool {
        match value.as_array() {
            Some(turns) if !turns.is_empty() => turns.iter().all(|turn| self.is_turn(turn)),
            _ => false,
        }
    }

    fn is_turn(&self, turn: &Value) -> bool {
        match turn.as_object() {
            Some(fields) => {
                self.role_keys.iter().any(|k| fields.contains_key(k.as_str()))
                    && self.content_keys.iter().any(|k| fields.contains_key(k.as_str()))
            }
            None => false,
        }
    }
}

impl Default for ChatShape {
    fn default() -> Self {
        Self::new(owned(DEFAULT_CHAT_KEYS), owned(DEFAULT_ROLE_KEYS), owned(DEFAULT_CONTENT_KEYS))
    }
}

impl Shape for ChatShape {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn is_shape(&self, sample: &Sample) -> bool {
        self.conversation_key(sample).is_some()
    }
}

/// Records that already carry tokenizer output
#[derive(Debug, Clone)]
pub struct TokenizedShape {
    keys: Vec<String>,
}

impl TokenizedShape {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Default for TokenizedShape {
    fn default() -> Self {
        Self::new(owned(DEFAULT_TOKENIZED_KEYS))
    }
}

impl Shape for TokenizedShape {
    fn name(&self) -> &'static str {
        "tokenized"
    }

    fn is_shape(&self, sample: &Sample) -> bool {
        self.keys.iter().any(|k| sample.contains_key(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(v: Value) -> Sample {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_qa_substring_and_case_insensitive() {
        let qa = QaShape::default();
        assert!(qa.is_shape(&sample(json!({"instruction": "x", "output": "y"}))));
        assert!(qa.is_shape(&sample(json!({"User_Question": "x", "GoldAnswer": "y"}))));
        assert!(!qa.is_shape(&sample(json!({"instruction": "x"}))));
        assert!(!qa.is_shape(&sample(json!({"text": "x"}))));
    }

    #[test]
    fn test_qa_columns_follow_synonym_priority() {
        let qa = QaShape::default();
        let s = sample(json!({"input": "ctx", "instruction": "do", "output": "done"}));
        assert_eq!(qa.columns(&s), Some(("instruction".to_string(), "output".to_string())));
    }

    #[test]
    fn test_qa_columns_are_distinct() {
        let qa = QaShape::default();
        let s = sample(json!({"input_output": "x"}));
        assert!(!qa.is_shape(&s));
        assert_eq!(qa.columns(&s), None);
    }

    #[test]
    fn test_qa_columns_backtrack_to_a_distinct_pair() {
        let qa = QaShape::default();
        let s = sample(json!({"prompt_label": "x", "prompt": "y"}));
        assert!(qa.is_shape(&s));
        assert_eq!(qa.columns(&s), Some(("prompt".to_string(), "prompt_label".to_string())));
    }

    #[test]
    fn test_chat_requires_role_and_content_on_every_turn() {
        let chat = ChatShape::default();
        assert!(chat.is_shape(&sample(json!({"messages": [{"role": "user", "content": "hi"}]}))));
        assert!(!chat.is_shape(&sample(json!({"messages": [{"role": "user"}]}))));
        assert!(!chat.is_shape(&sample(json!({
            "messages": [{"role": "user", "content": "hi"}, "stray"]
        }))));
        assert!(!chat.is_shape(&sample(json!({"messages": "hi"}))));
        assert!(!chat.is_shape(&sample(json!({"messages": []}))));
    }

    #[test]
    fn test_chat_skips_partially_valid_candidates() {
        let chat = ChatShape::default();
        let s = sample(json!({
            "messages": [{"role": "user"}],
            "conversations": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "yo"}]
        }));
        assert_eq!(chat.conversation_key(&s), Some("conversations"));
    }

    #[test]
    fn test_chat_custom_indicators() {
        let chat = ChatShape::new(owned(&["conversations"]), owned(&["from"]), owned(&["value"]));
        let s = sample(json!({"conversations": [{"from": "human", "value": "hi"}]}));
        assert_eq!(chat.conversation_key(&s), Some("conversations"));
    }

    #[test]
    fn test_tokenized_detection() {
        let tok = TokenizedShape::default();
        assert!(tok.is_shape(&sample(json!({"input_ids": [1, 2, 3]}))));
        assert!(!tok.is_shape(&sample(json!({"input": "x"}))));
    }
}
