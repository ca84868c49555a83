use serde_json::json;

use crate::catalog::{Catalog, Mode, Question, QuestionKind};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::pipeline::{Grade, SortField};
use crate::report::{FetchTicket, ReportSession, StateError, DEFAULT_PAGE_SIZE};
use crate::source::{HttpRecordSource, RecordSource, SourceError};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn session_and_source<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a mut ReportSession, &'a Option<Box<dyn RecordSource>>), serde_json::Value> {
    let AppState { session, source } = state;
    match session.as_mut() {
        Some(s) => Ok((s, &*source)),
        None => Err(err(&req.id, "no_session", "open a report first", None)),
    }
}

fn snapshot_value(session: &ReportSession) -> serde_json::Value {
    serde_json::to_value(session.snapshot()).unwrap_or_else(|_| json!({}))
}

fn state_err(req: &Request, e: StateError) -> serde_json::Value {
    err(&req.id, e.code, e.message, None)
}

/// Resolve an issued fetch against the configured source and feed the
/// response back. Without a configured endpoint every fetch fails, which
/// lands the session in degraded mode on the fallback set.
fn drive_fetch(
    source: &Option<Box<dyn RecordSource>>,
    session: &mut ReportSession,
    ticket: Option<FetchTicket>,
) {
    let Some(ticket) = ticket else {
        return;
    };
    let result = match source {
        Some(src) => src.fetch(&ticket.criteria),
        None => Err(SourceError::new(
            "no_endpoint",
            "no live endpoint configured",
        )),
    };
    session.apply_fetch(&ticket, result);
}

fn parse_page_size(v: Option<&serde_json::Value>) -> Result<usize, String> {
    let Some(value) = v else {
        return Ok(DEFAULT_PAGE_SIZE);
    };
    let Some(size) = value.as_u64() else {
        return Err("pageSize must be a positive integer".to_string());
    };
    if size == 0 || size > 500 {
        return Err("pageSize must be in range 1..=500".to_string());
    }
    Ok(size as usize)
}

fn parse_questions(req: &Request) -> Result<Option<Vec<Question>>, serde_json::Value> {
    let Some(raw) = req.params.get("questions") else {
        return Ok(None);
    };
    let Some(arr) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", "questions must be an array", None));
    };
    let mut out = Vec::new();
    for item in arr {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let kind = item
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(QuestionKind::parse);
        let (Some(id), Some(kind)) = (id, kind) else {
            return Err(err(
                &req.id,
                "bad_params",
                "each question needs an id and a known type",
                Some(json!({ "question": item })),
            ));
        };
        out.push(Question::new(id, title, kind));
    }
    Ok(Some(out))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let base_url = req
        .params
        .get("baseUrl")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let page_size = match parse_page_size(req.params.get("pageSize")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let catalog = match parse_questions(req) {
        Ok(Some(questions)) => Catalog::new(questions),
        Ok(None) => Catalog::builtin(),
        Err(e) => return e,
    };

    state.source = base_url.map(|url| Box::new(HttpRecordSource::new(&url)) as Box<dyn RecordSource>);
    let mut session = ReportSession::new(catalog, page_size);
    let ticket = session.reload();
    drive_fetch(&state.source, &mut session, Some(ticket));
    let resp = ok(&req.id, snapshot_value(&session));
    state.session = Some(session);
    resp
}

fn handle_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    match session_and_source(state, req) {
        Ok((session, _)) => ok(&req.id, snapshot_value(session)),
        Err(e) => e,
    }
}

fn handle_set_mode(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "mode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(mode) = Mode::parse(&raw) else {
        return err(
            &req.id,
            "bad_params",
            "mode must be one of: practice, exam",
            Some(json!({ "mode": raw })),
        );
    };
    let (session, source) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ticket = session.set_mode(mode);
    drive_fetch(source, session, ticket);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_question_type(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "questionType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_type = if raw == "all" {
        None
    } else {
        match QuestionKind::parse(&raw) {
            Some(kind) => Some(kind),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "questionType must be all or one of: imitation, listening, answering, retelling",
                    Some(json!({ "questionType": raw })),
                );
            }
        }
    };
    let (session, source) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ticket = match session.set_question_type(question_type) {
        Ok(t) => t,
        Err(e) => return state_err(req, e),
    };
    drive_fetch(source, session, ticket);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_id = if raw == "all" { None } else { Some(raw) };
    let (session, source) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ticket = match session.set_question(question_id) {
        Ok(t) => t,
        Err(e) => return state_err(req, e),
    };
    drive_fetch(source, session, ticket);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "className") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (session, _) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session.set_class(if raw == "all" { None } else { Some(raw) });
    ok(&req.id, snapshot_value(session))
}

fn handle_set_grade_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = if raw == "all" {
        None
    } else {
        match Grade::parse(&raw) {
            Some(g) => Some(g),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "grade must be all or one of: excellent, pass, low",
                    Some(json!({ "grade": raw })),
                );
            }
        }
    };
    let (session, _) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session.set_grade_filter(grade);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let keyword = match required_str(req, "keyword") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (session, _) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session.set_search(keyword);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_sort(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "field") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(field) = SortField::parse(&raw) else {
        return err(
            &req.id,
            "bad_params",
            "field must be one of: score, name, studentId, class",
            Some(json!({ "field": raw })),
        );
    };
    let (session, _) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session.set_sort(field);
    ok(&req.id, snapshot_value(session))
}

fn handle_set_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(page) = req.params.get("page").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "page must be a positive integer", None);
    };
    if page == 0 {
        return err(&req.id, "bad_params", "page must be >= 1", None);
    }
    let (session, _) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    session.set_page(page as usize);
    ok(&req.id, snapshot_value(session))
}

fn handle_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (session, source) = match session_and_source(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ticket = session.reload();
    drive_fetch(source, session, Some(ticket));
    ok(&req.id, snapshot_value(session))
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_open = state.session.take().is_some();
    state.source = None;
    ok(&req.id, json!({ "closed": was_open }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.open" => Some(handle_open(state, req)),
        "report.snapshot" => Some(handle_snapshot(state, req)),
        "report.setMode" => Some(handle_set_mode(state, req)),
        "report.setQuestionType" => Some(handle_set_question_type(state, req)),
        "report.setQuestion" => Some(handle_set_question(state, req)),
        "report.setClass" => Some(handle_set_class(state, req)),
        "report.setGradeFilter" => Some(handle_set_grade_filter(state, req)),
        "report.setSearch" => Some(handle_set_search(state, req)),
        "report.setSort" => Some(handle_set_sort(state, req)),
        "report.setPage" => Some(handle_set_page(state, req)),
        "report.reload" => Some(handle_reload(state, req)),
        "report.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
