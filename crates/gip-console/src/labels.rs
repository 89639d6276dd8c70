//! Free-text editing of agent labels: one `key=value` pair per line.

use crate::model::Labels;

/// Render labels as `key=value` lines in key order.
pub fn serialize_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `key=value` lines. The first `=` splits key from value, so values
/// may contain further `=`. Blank lines, lines without `=` and lines with an
/// empty key are skipped; a repeated key keeps its last value.
pub fn parse_labels(text: &str) -> Labels {
    let mut out = Labels::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), value.trim().to_string());
    }
    out
}

/// Local, unsynced edit buffer for an agent's labels.
///
/// `labels` is re-derived from `text` on every keystroke so a save always
/// sends what the user currently sees parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDraft {
    text: String,
    labels: Labels,
}

impl LabelDraft {
    pub fn begin(current: &Labels) -> Self {
        Self {
            text: serialize_labels(current),
            labels: current.clone(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn set_text(&mut self, text: String) {
        self.labels = parse_labels(&text);
        self.text = text;
    }

    pub fn push(&mut self, c: char) {
        self.text.push(c);
        self.labels = parse_labels(&self.text);
    }

    pub fn pop(&mut self) {
        self.text.pop();
        self.labels = parse_labels(&self.text);
    }
}
