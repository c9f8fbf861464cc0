use crate::db;
use crate::error::CoreResult;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::{db_conn, required_str, section_path};
use crate::ipc::types::{AppState, Request};
use crate::structure::{StructureTree, StudentStub};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

/// Load the tree, apply `edit`, persist it, and answer with the new tree.
/// Everything `edit` writes commits together with the tree or not at all.
fn mutate<T, F>(state: &mut AppState, req: &Request, op: &str, edit: F) -> serde_json::Value
where
    T: serde::Serialize,
    F: FnOnce(&mut StructureTree, &rusqlite::Connection) -> CoreResult<T>,
{
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let result = (|| -> CoreResult<(serde_json::Value, T)> {
        let tx = conn.unchecked_transaction()?;
        let mut tree = StructureTree::from_value(db::load_structure(&tx)?)?;
        let out = edit(&mut tree, &tx)?;
        let value = tree.to_value();
        db::save_structure(&tx, &value)?;
        tx.commit()?;
        Ok((value, out))
    })();
    match result {
        Ok((structure, out)) => {
            tracing::info!(op, "structure updated");
            ok(&req.id, json!({ "structure": structure, "result": out }))
        }
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::load_structure(conn) {
        Ok(v) => ok(&req.id, json!({ "structure": v })),
        Err(e) => core_err(&req.id, &e.into()),
    }
}

fn handle_add_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    mutate(state, req, "addGrade", |t, _| t.add_grade(&name))
}

fn handle_add_strand(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (grade, name) = match (required_str(req, "grade"), required_str(req, "name")) {
        (Ok(g), Ok(n)) => (g, n),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    mutate(state, req, "addStrand", |t, _| t.add_strand(&grade, &name))
}

fn handle_add_section(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (grade, strand, name) = match (
        required_str(req, "grade"),
        required_str(req, "strand"),
        required_str(req, "name"),
    ) {
        (Ok(g), Ok(s), Ok(n)) => (g, s, n),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
    };
    mutate(state, req, "addSection", |t, _| {
        t.add_section(&grade, &strand, &name)
    })
}

fn handle_add_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match section_path(req, None) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let student = req.params.get("student").cloned().unwrap_or_default();
    let mut stub: StudentStub = serde_json::from_value(student).unwrap_or_default();
    stub.name = stub.name.trim().to_string();
    if stub.name.is_empty() {
        return err(&req.id, "bad_params", "missing student.name", None);
    }
    if stub.id.trim().is_empty() {
        stub.id = Uuid::new_v4().to_string();
    }
    mutate(state, req, "addStudent", move |t, _| {
        t.add_student(&path, stub.clone())?;
        Ok(stub)
    })
}

fn handle_delete_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let grade = match required_str(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    mutate(state, req, "deleteGrade", |t, _| t.delete_grade(&grade).map(|_| ()))
}

fn handle_delete_strand(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (grade, strand) = match (required_str(req, "grade"), required_str(req, "strand")) {
        (Ok(g), Ok(s)) => (g, s),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    mutate(state, req, "deleteStrand", |t, _| {
        t.delete_strand(&grade, &strand).map(|_| ())
    })
}

fn handle_delete_section(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match section_path(req, None) {
        Ok(p) => p,
        Err(e) => return e,
    };
    mutate(state, req, "deleteSection", |t, _| {
        t.delete_section(&path.grade, &path.strand, &path.section)
            .map(|_| ())
    })
}

/// Removes the stub. The stored record stays unless `deleteRecord` is set.
fn handle_delete_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (path, id) = match (section_path(req, None), required_str(req, "id")) {
        (Ok(p), Ok(id)) => (p, id),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let delete_record = req
        .params
        .get("deleteRecord")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    mutate(state, req, "deleteStudent", |t, conn| {
        let stub = t.delete_student(&path, &id)?;
        let record_deleted = delete_record && db::delete_record(conn, &stub.id)?;
        Ok(json!({ "student": stub, "recordDeleted": record_deleted }))
    })
}

/// Report stubs without a stored record and records no stub points at.
/// Nothing is repaired: a stub may legitimately precede its first save.
fn handle_check_integrity(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let result = (|| -> CoreResult<serde_json::Value> {
        let tree = StructureTree::from_value(db::load_structure(conn)?)?;
        let ids: HashSet<String> = db::record_ids(conn)?.into_iter().collect();
        let mut stub_ids = HashSet::new();
        let mut dangling = Vec::new();
        for (path, stub) in tree.stubs() {
            stub_ids.insert(stub.id.clone());
            if !ids.contains(&stub.id) {
                dangling.push(json!({ "id": stub.id, "name": stub.name, "path": path }));
            }
        }
        let orphans: Vec<String> = db::record_ids(conn)?
            .into_iter()
            .filter(|id| !stub_ids.contains(id))
            .collect();
        Ok(json!({
            "ok": dangling.is_empty() && orphans.is_empty(),
            "danglingStubs": dangling,
            "orphanRecords": orphans,
        }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "structure.get" => Some(handle_get(state, req)),
        "structure.addGrade" => Some(handle_add_grade(state, req)),
        "structure.addStrand" => Some(handle_add_strand(state, req)),
        "structure.addSection" => Some(handle_add_section(state, req)),
        "structure.addStudent" => Some(handle_add_student(state, req)),
        "structure.deleteGrade" => Some(handle_delete_grade(state, req)),
        "structure.deleteStrand" => Some(handle_delete_strand(state, req)),
        "structure.deleteSection" => Some(handle_delete_section(state, req)),
        "structure.deleteStudent" => Some(handle_delete_student(state, req)),
        "structure.checkIntegrity" => Some(handle_check_integrity(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rusqlite::Connection;

    fn state_with_student() -> AppState {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        db::save_structure(
            &conn,
            &json!({"Grade 11": {"STEM": {"A": [{"id": "s1", "name": "DELA CRUZ, JUAN"}]}}}),
        )
        .expect("tree");
        db::put_record(&conn, "s1", &json!({"id": "s1", "info": {"lname": "DELA CRUZ"}}))
            .expect("record");
        let mut state = AppState::new(Config::default());
        state.db = Some(conn);
        state
    }

    fn delete_request() -> Request {
        Request {
            id: "1".into(),
            method: "structure.deleteStudent".into(),
            params: json!({
                "grade": "Grade 11", "strand": "STEM", "section": "A",
                "id": "s1", "deleteRecord": true
            }),
        }
    }

    #[test]
    fn delete_student_with_record_removes_both() {
        let mut state = state_with_student();
        let resp = try_handle(&mut state, &delete_request()).expect("handled");
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["result"]["result"]["recordDeleted"], true);
        let conn = state.db.as_ref().expect("db");
        assert!(db::get_record(conn, "s1").expect("get").is_none());
        assert_eq!(
            db::load_structure(conn).expect("tree"),
            json!({"Grade 11": {"STEM": {"A": []}}})
        );
    }

    #[test]
    fn failed_tree_save_keeps_the_record() {
        let mut state = state_with_student();
        state
            .db
            .as_ref()
            .expect("db")
            .execute_batch(
                "CREATE TRIGGER no_tree_update BEFORE UPDATE ON structure
                 BEGIN SELECT RAISE(ABORT, 'structure is read-only'); END;
                 CREATE TRIGGER no_tree_insert BEFORE INSERT ON structure
                 BEGIN SELECT RAISE(ABORT, 'structure is read-only'); END;",
            )
            .expect("triggers");

        let resp = try_handle(&mut state, &delete_request()).expect("handled");
        assert_eq!(resp["ok"], false);
        let conn = state.db.as_ref().expect("db");
        assert!(db::get_record(conn, "s1").expect("get").is_some());
        let tree = db::load_structure(conn).expect("tree");
        assert_eq!(tree["Grade 11"]["STEM"]["A"][0]["id"], "s1");
    }
}
