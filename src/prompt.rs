//! Prompt assembly: fixed layout, sanitized inputs, structured memory block,
//! and attachment handling.
//!
//! The assembler produces the final model prompt: system prompt, tool and
//! sub-agent manifests in deterministic order, the conversation-memory
//! block, attachments, then the sanitized user message. Memory renders as a
//! compact structured document when the encoder cooperates and falls back to
//! a numbered list when it does not.

use std::collections::HashMap;

use base64::Engine as _;
use serde::Serialize;

use crate::helpers::{escape_prompt_content, sanitize_input};
use crate::memory::engine::ScoredRecord;
use crate::memory::MemoryRecord;
use crate::types::{File, ToolSpec};

/// Per-file preview cap for inlined text attachments.
pub const FILE_PREVIEW_CAP: usize = 1024;

/// Everything the assembler needs for one completion call.
pub struct PromptInput<'a> {
    pub system_prompt: &'a str,
    pub tools: &'a [ToolSpec],
    /// (name, description) pairs in registration order.
    pub subagents: &'a [(String, String)],
    pub memories: &'a [ScoredRecord],
    pub user_input: &'a str,
    pub files: &'a [File],
}

#[derive(Serialize)]
struct MemoryBlockEntry {
    role: String,
    space: String,
    score: f32,
    importance: f32,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    content: String,
    updated: String,
}

fn block_entry(hit: &ScoredRecord) -> MemoryBlockEntry {
    let r = &hit.record;
    MemoryBlockEntry {
        role: r.role().to_string(),
        space: r.space.clone(),
        score: hit.score,
        importance: r.importance,
        source: r.source.clone(),
        summary: r.summary.clone(),
        content: escape_prompt_content(&r.content),
        updated: r.last_embedded.to_rfc3339(),
    }
}

/// Renders the conversation-memory block: structured encoding first, a
/// numbered list as the fallback.
fn render_memory_block(memories: &[ScoredRecord]) -> String {
    let entries: Vec<MemoryBlockEntry> = memories.iter().map(block_entry).collect();

    match toon_format::encode_default(&entries) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "structured memory encoding failed, using list fallback");
            let mut out = String::new();
            for (i, entry) in entries.iter().enumerate() {
                out.push_str(&format!(
                    "{}. [{} | space={} | score={:.3} | importance={:.2} | source={} | updated={}] {}\n",
                    i + 1,
                    entry.role,
                    entry.space,
                    entry.score,
                    entry.importance,
                    entry.source,
                    entry.updated,
                    entry.content,
                ));
                if let Some(summary) = &entry.summary {
                    out.push_str(&format!("   summary: {summary}\n"));
                }
            }
            out
        }
    }
}

fn render_file(file: &File, out: &mut String) {
    if file.is_text() {
        let preview_len = file.data.len().min(FILE_PREVIEW_CAP);
        let preview = String::from_utf8_lossy(&file.data[..preview_len]);
        out.push_str(&format!(
            "<<<FILE {} [{}]>>>:\n{}\n<<<END FILE {}>>>\n",
            file.name,
            file.mime_type,
            escape_prompt_content(&preview),
            file.name,
        ));
    } else {
        out.push_str(&format!(
            "Attached binary file: {} ({}, {} bytes)\n",
            file.name,
            file.mime_type,
            file.data.len(),
        ));
    }
}

/// Assembles the final model prompt.
pub fn assemble(input: &PromptInput) -> String {
    let mut out = String::new();

    if !input.system_prompt.is_empty() {
        out.push_str(input.system_prompt);
        out.push_str("\n\n");
    }

    if !input.tools.is_empty() {
        out.push_str("Available tools:\n");
        for spec in input.tools {
            let schema = serde_json::to_string(&spec.input_schema).unwrap_or_default();
            out.push_str(&format!("- {}: {} | input: {}\n", spec.name, spec.description, schema));
        }
        out.push('\n');
    }

    if !input.subagents.is_empty() {
        out.push_str("Available sub-agents:\n");
        for (name, description) in input.subagents {
            out.push_str(&format!("- {name}: {description}\n"));
        }
        out.push_str("Delegate with: subagent:<name> <task>\n\n");
    }

    if !input.memories.is_empty() {
        out.push_str("Conversation memory:\n");
        out.push_str(&render_memory_block(input.memories));
        out.push('\n');
    }

    if !input.files.is_empty() {
        for file in input.files {
            render_file(file, &mut out);
        }
        out.push('\n');
    }

    out.push_str("Current user message: ");
    out.push_str(&sanitize_input(input.user_input));
    out.push_str("\nCompose the best possible assistant reply.");
    out
}

/// Metadata persisted alongside an uploaded attachment, base64 payload
/// included so later turns can rehydrate the file.
pub fn attachment_metadata(file: &File) -> HashMap<String, serde_json::Value> {
    HashMap::from([
        (
            "filename".to_string(),
            serde_json::Value::String(file.name.clone()),
        ),
        (
            "mime".to_string(),
            serde_json::Value::String(file.mime_type.clone()),
        ),
        (
            "size_bytes".to_string(),
            serde_json::json!(file.data.len()),
        ),
        (
            "text".to_string(),
            serde_json::Value::String(if file.is_text() { "true" } else { "false" }.into()),
        ),
        (
            "data_base64".to_string(),
            serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(&file.data),
            ),
        ),
    ])
}

/// Rebuilds attachments from previously stored records so the model always
/// sees the session's full file context. Records without a decodable
/// payload are skipped.
pub fn rehydrate_attachments(records: &[MemoryRecord]) -> Vec<File> {
    let mut out = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for record in records {
        let name = match record.metadata.get("filename") {
            Some(n) if !n.is_empty() => n.clone(),
            _ => continue,
        };
        if seen.contains(&name) {
            continue;
        }
        let data = match record
            .metadata
            .get("data_base64")
            .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
        {
            Some(d) => d,
            None => continue,
        };

        seen.push(name.clone());
        out.push(File {
            name,
            mime_type: record
                .metadata
                .get("mime")
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            data,
        });
    }
    out
}
