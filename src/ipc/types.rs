use serde::Deserialize;

use crate::report::ReportSession;
use crate::source::RecordSource;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub session: Option<ReportSession>,
    pub source: Option<Box<dyn RecordSource>>,
}
