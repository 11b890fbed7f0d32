use serde::{Deserialize, Serialize};

const TRUNCATION_MARKER: &str = "[truncated]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedPrompt {
    pub text: String,
    pub original_chars: usize,
    pub truncated: bool,
}

impl OptimizedPrompt {
    pub fn saved_chars(&self) -> usize {
        self.original_chars.saturating_sub(self.text.chars().count())
    }
}

/// Trims prompts to keep per-call cost bounded. Never changes meaning beyond
/// whitespace, except when a prompt is over budget and its tail is dropped.
#[derive(Debug, Clone)]
pub struct CostOptimizer {
    max_prompt_chars: usize,
}

impl CostOptimizer {
    pub fn new(max_prompt_chars: usize) -> Self {
        Self { max_prompt_chars }
    }

    pub fn max_prompt_chars(&self) -> usize {
        self.max_prompt_chars
    }

    pub fn optimize_prompt(&self, prompt: &str) -> OptimizedPrompt {
        let original_chars = prompt.chars().count();
        let compacted = compact(prompt);

        if compacted.chars().count() <= self.max_prompt_chars {
            return OptimizedPrompt {
                text: compacted,
                original_chars,
                truncated: false,
            };
        }

        let budget = self
            .max_prompt_chars
            .saturating_sub(TRUNCATION_MARKER.chars().count() + 1);
        let mut text = String::new();
        let mut used = 0;
        for line in compacted.lines() {
            let len = line.chars().count() + 1;
            if used + len > budget {
                break;
            }
            text.push_str(line);
            text.push('\n');
            used += len;
        }
        // A single oversized first line is cut mid-line rather than dropped.
        if text.is_empty() {
            text = compacted.chars().take(budget).collect();
            text.push('\n');
        }
        text.push_str(TRUNCATION_MARKER);

        tracing::debug!(
            original_chars,
            kept_chars = text.chars().count(),
            "Prompt truncated to budget"
        );

        OptimizedPrompt {
            text,
            original_chars,
            truncated: true,
        }
    }
}

/// Drop blank lines and indentation, collapse whitespace runs inside lines.
fn compact(prompt: &str) -> String {
    prompt
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
