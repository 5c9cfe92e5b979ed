//! To-do tool handlers

use crate::error::Result;
use crate::store::Store;
use serde_json::{json, Value};

/// List tasks for a session. The compact form returns item strings the
/// way models expect to read them back; `detailed` includes the full
/// rows.
pub fn list(store: &Store, session_id: Option<&str>, detailed: bool) -> Result<Value> {
    let tasks = store.list_tasks(session_id)?;
    if detailed {
        Ok(json!({ "todos": tasks, "count": tasks.len() }))
    } else {
        let items: Vec<&str> = tasks.iter().map(|t| t.item.as_str()).collect();
        Ok(json!({ "todos": items, "count": items.len() }))
    }
}

/// Append a task to the session list.
pub fn add(store: &Store, session_id: &str, item: &str) -> Result<Value> {
    let task = store.add_task(item, Some(session_id))?;
    let count = store.list_tasks(Some(session_id))?.len();
    Ok(json!({ "id": task.id, "item": task.item, "count": count }))
}

/// Clear the session's tasks. Scoped clears only; there is no global
/// wipe.
pub fn clear(store: &Store, session_id: &str) -> Result<Value> {
    let deleted = store.clear_tasks(session_id)?;
    Ok(json!({ "deleted": deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (Store::open(dir.path().join("app.db")).unwrap(), dir)
    }

    #[test]
    fn test_add_and_list_compact() {
        let (store, _dir) = store();
        add(&store, "s1", "design schema").unwrap();
        add(&store, "s1", "write tests").unwrap();

        let value = list(&store, Some("s1"), false).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["todos"][0], "design schema");
    }

    #[test]
    fn test_list_detailed_includes_status() {
        let (store, _dir) = store();
        add(&store, "s1", "design schema").unwrap();
        let value = list(&store, Some("s1"), true).unwrap();
        assert_eq!(value["todos"][0]["status"], "pending");
        assert_eq!(value["todos"][0]["item"], "design schema");
    }

    #[test]
    fn test_clear_is_scoped() {
        let (store, _dir) = store();
        add(&store, "s1", "mine").unwrap();
        add(&store, "s2", "theirs").unwrap();

        let value = clear(&store, "s1").unwrap();
        assert_eq!(value["deleted"], 1);
        assert_eq!(list(&store, Some("s2"), false).unwrap()["count"], 1);
    }
}
