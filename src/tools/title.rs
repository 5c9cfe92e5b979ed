//! Chat title derivation
//!
//! Titles come from the first user message of a session, trimmed to a
//! word boundary. The operation is idempotent: an existing title is kept
//! unless `force` is set.

use crate::error::{CampfireError, Result};
use crate::store::{Role, Store};
use serde_json::{json, Value};

const MAX_TITLE_CHARS: usize = 80;

/// Derive and persist a title for the session.
pub fn generate(store: &Store, session_id: &str, force: bool) -> Result<Value> {
    let session = store.get_session(session_id)?;
    if let Some(existing) = session.title.as_deref() {
        if !existing.trim().is_empty() && !force {
            return Ok(json!({ "title": existing, "generated": false }));
        }
    }

    let messages = store.list_messages(session_id, None, 0)?;
    let first_user = messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .ok_or_else(|| {
            CampfireError::Validation(format!("session {} has no user messages", session_id))
        })?;

    let title = derive_title(&first_user.content);
    store.update_session_title(session_id, &title)?;
    Ok(json!({ "title": title, "generated": true }))
}

/// Collapse whitespace and cut at a word boundary.
fn derive_title(content: &str) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }

    let mut title = String::new();
    for word in collapsed.split(' ') {
        let candidate_len = if title.is_empty() {
            word.chars().count()
        } else {
            title.chars().count() + 1 + word.chars().count()
        };
        if candidate_len > MAX_TITLE_CHARS {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }
    if title.is_empty() {
        // Single oversized word: hard cut.
        title = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    }
    format!("{}…", title)
}
