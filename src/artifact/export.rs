//! Deterministic submission-pack export
//!
//! Assembles a ZIP with a fixed entry order and fixed modification
//! timestamps so that identical session state produces byte-identical
//! archives. `exported_at` is the session's `updated_at`, not wall-clock
//! time, for the same reason.

use crate::error::{CampfireError, Result};
use crate::store::{ArtifactKind, Store};
use serde_json::json;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const IDEA_STUB: &str = "No project idea generated yet.";
const STACK_STUB: &str = "No tech stack generated yet.";
const SUMMARY_STUB: &str = "No submission summary generated yet.";
const RULES_STUB: &str = "No context ingested.";

/// Build the submission pack for a session.
///
/// Entries, in order: `idea.md`, `tech_stack.md`, `summary.md`,
/// `todos.json`, `rules_ingested.txt`, `session_metadata.json`.
pub fn build_submission_pack(store: &Store, session_id: &str, model_id: &str) -> Result<Vec<u8>> {
    let session = store.get_session(session_id)?;

    let idea = artifact_text(store, session_id, ArtifactKind::ProjectIdea, IDEA_STUB)?;
    let stack = artifact_text(store, session_id, ArtifactKind::TechStack, STACK_STUB)?;
    let summary = artifact_text(store, session_id, ArtifactKind::SubmissionSummary, SUMMARY_STUB)?;

    let tasks = store.list_tasks(Some(session_id))?;
    let todos_json: Vec<serde_json::Value> = tasks
        .iter()
        .map(|task| {
            json!({
                "id": task.id,
                "item": task.item,
                "status": task.status,
                "priority": task.priority,
                "sort_order": task.sort_order,
                "created_at": task.created_at,
                "updated_at": task.updated_at,
                "completed_at": task.completed_at,
            })
        })
        .collect();

    let rules = store.list_active_context(Some(session_id))?;
    let rules_text = if rules.is_empty() {
        RULES_STUB.to_string()
    } else {
        // Two blank lines between rows.
        rules
            .iter()
            .map(|row| row.content.trim().to_string())
            .collect::<Vec<_>>()
            .join("\n\n\n")
    };

    let metadata = json!({
        "session_id": session.session_id,
        "title": session.title,
        "created_at": session.created_at,
        "updated_at": session.updated_at,
        "message_count": store.count_messages(session_id)?,
        "model_id": model_id,
        "exported_at": session.updated_at,
    });

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut buffer);
        // Fixed timestamp (the zip epoch) keeps back-to-back exports
        // byte-identical.
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        write_entry(&mut writer, options, "idea.md", &with_newline(&idea))?;
        write_entry(&mut writer, options, "tech_stack.md", &with_newline(&stack))?;
        write_entry(&mut writer, options, "summary.md", &with_newline(&summary))?;
        write_entry(
            &mut writer,
            options,
            "todos.json",
            &serde_json::to_string_pretty(&todos_json).map_err(CampfireError::Serialization)?,
        )?;
        write_entry(&mut writer, options, "rules_ingested.txt", &rules_text)?;
        write_entry(
            &mut writer,
            options,
            "session_metadata.json",
            &serde_json::to_string_pretty(&metadata).map_err(CampfireError::Serialization)?,
        )?;

        writer
            .finish()
            .map_err(|e| CampfireError::Internal(format!("zip finalize failed: {}", e)))?;
    }
    Ok(buffer.into_inner())
}

fn artifact_text(
    store: &Store,
    session_id: &str,
    kind: ArtifactKind,
    stub: &str,
) -> Result<String> {
    Ok(store
        .get_artifact(session_id, kind)?
        .map(|artifact| artifact.content)
        .filter(|content| !content.trim().is_empty())
        .unwrap_or_else(|| stub.to_string()))
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

fn write_entry(
    writer: &mut ZipWriter<&mut std::io::Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    name: &str,
    content: &str,
) -> Result<()> {
    writer
        .start_file(name, options)
        .map_err(|e| CampfireError::Internal(format!("zip entry {} failed: {}", name, e)))?;
    writer
        .write_all(content.as_bytes())
        .map_err(|e| CampfireError::Internal(format!("zip write {} failed: {}", name, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContextSource, Role, TaskPatch, TaskStatus};
    use std::io::Read;
    use tempfile::tempdir;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (Store::open(dir.path().join("app.db")).unwrap(), dir)
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn entry_text(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_entry_order_is_fixed() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();

        let bytes = build_submission_pack(&store, "s1", "gpt-oss:20b").unwrap();
        assert_eq!(
            entry_names(&bytes),
            vec![
                "idea.md",
                "tech_stack.md",
                "summary.md",
                "todos.json",
                "rules_ingested.txt",
                "session_metadata.json",
            ]
        );
    }

    #[test]
    fn test_stubs_for_missing_artifacts() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        let bytes = build_submission_pack(&store, "s1", "m").unwrap();
        assert!(entry_text(&bytes, "idea.md").contains("No project idea"));
        assert!(entry_text(&bytes, "rules_ingested.txt").contains("No context"));
    }

    #[test]
    fn test_artifacts_and_todos_included() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        store
            .put_artifact("s1", ArtifactKind::ProjectIdea, "A bee tracker.", None)
            .unwrap();
        let task = store.add_task("design schema", Some("s1")).unwrap();
        store
            .update_task(
                task.id,
                &TaskPatch {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .unwrap();

        let bytes = build_submission_pack(&store, "s1", "m").unwrap();
        assert_eq!(entry_text(&bytes, "idea.md"), "A bee tracker.\n");

        let todos: serde_json::Value =
            serde_json::from_str(&entry_text(&bytes, "todos.json")).unwrap();
        assert_eq!(todos[0]["item"], "design schema");
        assert_eq!(todos[0]["status"], "done");
        assert!(todos[0]["completed_at"].is_string());
        assert!(todos[0].get("session_id").is_none());
    }

    #[test]
    fn test_rules_joined_with_two_blank_lines() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        store
            .insert_context(ContextSource::Text, "rule one", None, Some("s1"))
            .unwrap();
        store
            .insert_context(ContextSource::Text, "rule two", None, Some("s1"))
            .unwrap();

        let bytes = build_submission_pack(&store, "s1", "m").unwrap();
        assert_eq!(entry_text(&bytes, "rules_ingested.txt"), "rule one\n\n\nrule two");
    }

    #[test]
    fn test_metadata_fields() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        store.append_message("s1", Role::Assistant, "hello", None).unwrap();
        store.update_session_title("s1", "Bees").unwrap();

        let bytes = build_submission_pack(&store, "s1", "gpt-oss:20b").unwrap();
        let meta: serde_json::Value =
            serde_json::from_str(&entry_text(&bytes, "session_metadata.json")).unwrap();
        assert_eq!(meta["session_id"], "s1");
        assert_eq!(meta["title"], "Bees");
        assert_eq!(meta["message_count"], 2);
        assert_eq!(meta["model_id"], "gpt-oss:20b");
        assert_eq!(meta["exported_at"], meta["updated_at"]);
    }

    #[test]
    fn test_back_to_back_exports_are_byte_identical() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        store
            .put_artifact("s1", ArtifactKind::TechStack, "Backend: Rust", None)
            .unwrap();
        store.add_task("ship it", Some("s1")).unwrap();

        let first = build_submission_pack(&store, "s1", "m").unwrap();
        let second = build_submission_pack(&store, "s1", "m").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let (store, _dir) = store();
        let err = build_submission_pack(&store, "ghost", "m").unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::NotFound(_)));
    }

    #[test]
    fn test_tasks_from_other_sessions_excluded() {
        let (store, _dir) = store();
        store.append_message("s1", Role::User, "hi", None).unwrap();
        store.add_task("mine", Some("s1")).unwrap();
        store.add_task("theirs", Some("s2")).unwrap();

        let bytes = build_submission_pack(&store, "s1", "m").unwrap();
        let todos: serde_json::Value =
            serde_json::from_str(&entry_text(&bytes, "todos.json")).unwrap();
        assert_eq!(todos.as_array().unwrap().len(), 1);
        assert_eq!(todos[0]["item"], "mine");
    }
}
