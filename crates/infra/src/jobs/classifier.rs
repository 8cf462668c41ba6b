//! Keyword-based priority classification.
//!
//! Rules are applied in order, first match wins:
//!
//! 1. error / failure / payment-problem keywords → `Urgent`
//! 2. new-lead / quote / purchase keywords → `High`
//! 3. delivery-status update, or acknowledgement keywords → `Low`
//! 4. anything else → `Normal`
//!
//! Matching is a case-insensitive substring test, except that keywords of
//! up to [`WHOLE_WORD_MAX_CHARS`] characters must stand as a whole word
//! (`ok` matches "ok, grazie" but not "book"). The keyword lists are
//! configuration; the defaults cover Italian and English.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hookq_core::Priority;

/// Keyword lists and payload fields the classifier looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub urgent_keywords: Vec<String>,
    pub high_keywords: Vec<String>,
    pub low_keywords: Vec<String>,
    /// Object keys whose string values count as message text.
    pub text_fields: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            urgent_keywords: strings(&[
                "errore",
                "error",
                "problema",
                "problem",
                "pagamento",
                "payment",
                "non funziona",
                "not working",
                "urgente",
                "urgent",
                "rimborso",
                "refund",
                "fallito",
                "failed",
                "bloccato",
                "guasto",
            ]),
            high_keywords: strings(&[
                "preventivo",
                "quote",
                "quotation",
                "acquisto",
                "acquistare",
                "comprare",
                "purchase",
                "buy",
                "ordine",
                "order",
                "prezzo",
                "price",
                "listino",
                "nuovo cliente",
                "new customer",
                "informazioni",
                "disponibilità",
            ]),
            low_keywords: strings(&[
                "ok",
                "grazie",
                "thanks",
                "thank you",
                "ricevuto",
                "perfetto",
                "va bene",
            ]),
            text_fields: strings(&["text", "body", "message", "content", "subject", "caption"]),
        }
    }
}

/// Pure payload → tier mapping.
#[derive(Debug, Clone)]
pub struct PriorityClassifier {
    urgent: Vec<String>,
    high: Vec<String>,
    low: Vec<String>,
    text_fields: Vec<String>,
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl PriorityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            urgent: normalize(config.urgent_keywords),
            high: normalize(config.high_keywords),
            low: normalize(config.low_keywords),
            text_fields: normalize(config.text_fields),
        }
    }

    pub fn classify(&self, payload: &Value) -> Priority {
        let text = self.extract_text(payload);

        if !text.is_empty() {
            if contains_any(&text, &self.urgent) {
                return Priority::Urgent;
            }
            if contains_any(&text, &self.high) {
                return Priority::High;
            }
            if contains_any(&text, &self.low) {
                return Priority::Low;
            }
            return Priority::Normal;
        }

        if is_delivery_status(payload) {
            Priority::Low
        } else {
            Priority::Normal
        }
    }

    /// Lowercased message text found in the payload, fragments joined by spaces.
    pub fn extract_text(&self, payload: &Value) -> String {
        let mut parts = Vec::new();
        self.collect_text(payload, true, &mut parts);
        parts.join(" ").to_lowercase()
    }

    fn collect_text<'a>(&self, value: &'a Value, in_text_field: bool, out: &mut Vec<&'a str>) {
        match value {
            Value::String(s) if in_text_field => {
                let s = s.trim();
                if !s.is_empty() {
                    out.push(s);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.collect_text(item, in_text_field, out);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    let is_text = self.text_fields.iter().any(|f| f.eq_ignore_ascii_case(key));
                    self.collect_text(child, is_text, out);
                }
            }
            _ => {}
        }
    }
}

fn normalize(words: Vec<String>) -> Vec<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Keywords this short only match on word boundaries.
pub const WHOLE_WORD_MAX_CHARS: usize = 2;

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| contains_keyword(text, k))
}

fn contains_keyword(text: &str, keyword: &str) -> bool {
    if keyword.chars().count() > WHOLE_WORD_MAX_CHARS {
        return text.contains(keyword);
    }
    text.match_indices(keyword).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Status callbacks (`sent`, `delivered`, `read`, ...) carry no message text.
fn is_delivery_status(payload: &Value) -> bool {
    let Value::Object(map) = payload else {
        return false;
    };

    let has_statuses = map
        .get("statuses")
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    let has_status = map.get("status").is_some_and(Value::is_string);

    has_statuses || has_status
}
