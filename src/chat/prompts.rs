//! System prompt assembly for chat turns

use crate::index::RetrievalHit;
use std::fmt::Write;

const PERSONA: &str = "You are Campfire, an expert assistant that helps participants \
create, refine, and submit hackathon projects completely offline.

You have access to function-calling tools. Use them when they clearly help:
- add_todo to record actionable tasks on the project to-do list.
- list_todos to recall current tasks; trust its output and present it without speculation.
- clear_todos to reset the task list when asked.
- list_directory to explore project files when requested.
- derive_project_idea, create_tech_stack, and summarize_chat_history to produce \
stored project artifacts.

The current chat session id is injected by the runtime at execution time. Never ask \
the user for it; you may omit it from tool arguments and the runtime supplies the \
correct value, overriding anything you pass.";

const GUIDANCE: &str = "Guidance:
- Prefer calling tools over describing actions.
- When planning work, record the steps as separate add_todo calls.
- Keep the tone clear, concise, and encouraging. Never mention external APIs or \
internet resources.
- Cite rule chunk numbers in brackets when referring to a specific rule.";

/// Build the per-turn system prompt: persona, retrieved context tagged
/// with stable chunk ids, then tool guidance.
pub fn build_system_prompt(rule_hits: &[RetrievalHit]) -> String {
    let mut prompt = String::from(PERSONA);
    prompt.push_str("\n\nRules context (authoritative):\n");
    if rule_hits.is_empty() {
        prompt.push_str("(no context has been ingested for this session)\n");
    } else {
        for hit in rule_hits {
            let _ = writeln!(prompt, "[chunk {}]\n{}\n", hit.chunk_id, hit.text);
        }
    }
    prompt.push('\n');
    prompt.push_str(GUIDANCE);
    prompt
}
