use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::ReportSession;

fn session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a ReportSession, serde_json::Value> {
    state
        .session
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_session", "open a report first", None))
}

/// Questions selectable under the session's current mode and type scope.
fn handle_questions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let questions = session
        .questions()
        .into_iter()
        .map(|q| serde_json::to_value(q).unwrap_or_else(|_| json!({})))
        .collect::<Vec<_>>();
    ok(&req.id, json!({ "questions": questions }))
}

/// Distinct classes present in the fetched record set.
fn handle_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    ok(&req.id, json!({ "classes": session.classes() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.questions" => Some(handle_questions(state, req)),
        "catalog.classes" => Some(handle_classes(state, req)),
        _ => None,
    }
}
