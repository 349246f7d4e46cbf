//! Tool-intent classification for the turn pipeline.
//!
//! Most turns need no tool at all, and the LLM tool-selection call dominates
//! latency when issued unconditionally. This module is the cheap gate the
//! pipeline consults before involving the orchestrator model.

/// Whether a user message might warrant tool use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolIntent {
    /// Definitely no tool: skip the orchestrator entirely.
    Skip,
    /// Possibly a tool task: worth one model call to decide.
    Maybe,
}

/// Action verbs that usually signal a tool task.
const ACTION_VERBS: &[&str] = &[
    "search", "find", "lookup", "query", "fetch", "get", "list", "show", "display", "read",
    "load", "retrieve", "write", "save", "create", "update", "delete", "call", "execute", "run",
    "invoke",
];

/// Interrogative openers that tend to require looking something up.
const TOOL_INTERROGATIVES: &[&str] = &["how many", "how much", "when did", "where is", "who wrote"];

/// Classifies a message for the orchestrator fast path.
///
/// Skips when the trimmed input is shorter than 10 characters, is a JSON
/// payload (those are handled by earlier pipeline states), or contains none
/// of the action verbs or tool-flavored interrogatives.
pub fn classify_tool_intent(input: &str) -> ToolIntent {
    let trimmed = input.trim();
    if trimmed.len() < 10 {
        return ToolIntent::Skip;
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return ToolIntent::Skip;
    }

    let lower = trimmed.to_lowercase();

    if TOOL_INTERROGATIVES.iter().any(|p| lower.contains(p)) {
        return ToolIntent::Maybe;
    }

    let has_verb = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| ACTION_VERBS.contains(&tok));

    if has_verb {
        ToolIntent::Maybe
    } else {
        ToolIntent::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_inputs_skip() {
        assert_eq!(classify_tool_intent("Hi"), ToolIntent::Skip);
        assert_eq!(classify_tool_intent("Thanks"), ToolIntent::Skip);
    }

    #[test]
    fn plain_questions_skip() {
        assert_eq!(classify_tool_intent("What is pgvector?"), ToolIntent::Skip);
        assert_eq!(
            classify_tool_intent("Why does the borrow checker complain?"),
            ToolIntent::Skip
        );
    }

    #[test]
    fn json_payloads_skip() {
        assert_eq!(
            classify_tool_intent(r#"{"tool": "echo", "arguments": {}}"#),
            ToolIntent::Skip
        );
    }

    #[test]
    fn action_verbs_pass_the_gate() {
        assert_eq!(
            classify_tool_intent("search the release notes for breaking changes"),
            ToolIntent::Maybe
        );
        assert_eq!(
            classify_tool_intent("delete the stale session records"),
            ToolIntent::Maybe
        );
    }

    #[test]
    fn verbs_match_whole_words_only() {
        // "listen" contains "list" but is not a tool verb.
        assert_eq!(
            classify_tool_intent("please listen carefully to me"),
            ToolIntent::Skip
        );
    }

    #[test]
    fn tool_interrogatives_pass_the_gate() {
        assert_eq!(
            classify_tool_intent("how many sessions were active yesterday?"),
            ToolIntent::Maybe
        );
    }
}
