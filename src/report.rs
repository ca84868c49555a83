use log::{debug, info, warn};
use serde::Serialize;

use crate::catalog::{Catalog, Mode, Question, QuestionKind};
use crate::pipeline::{
    aggregate, filter_class, filter_detail, page_window, sort_records, AnswerRecord,
    DerivedStatistics, Grade, SortField, SortOrder,
};
use crate::source::{fallback_records, Criteria, RecordSet, SourceError};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Degraded,
}

/// Rejected state transition (invalid selection for the current scope).
#[derive(Debug, Clone)]
pub struct StateError {
    pub code: &'static str,
    pub message: String,
}

impl StateError {
    fn new(code: &'static str, message: impl Into<String>) -> StateError {
        StateError {
            code,
            message: message.into(),
        }
    }
}

/// One issued fetch. The token decides at apply time whether the response
/// still belongs to the current criteria; a superseded response is dropped.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    pub token: u64,
    pub criteria: Criteria,
}

/// First pipeline stage a mutation invalidates. Later stages are derived
/// from earlier ones, so recompute always runs a suffix of this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    ClassFilter,
    DetailFilter,
    Sort,
    Page,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSnapshot {
    pub mode: &'static str,
    pub question_type: String,
    pub question_id: String,
    pub class_name: String,
    pub grade_filter: String,
    pub search_keyword: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSnapshot {
    pub field: &'static str,
    pub order: &'static str,
}

/// Read-only view handed to the presentation layer after each recompute.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub data_state: &'static str,
    pub fetched_count: usize,
    pub filtered_count: usize,
    pub statistics: DerivedStatistics,
    pub page_items: Vec<AnswerRecord>,
    pub current_page: usize,
    pub total_pages: usize,
    pub page_size: usize,
    pub sort: SortSnapshot,
    pub filters: FilterSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

pub struct ReportSession {
    catalog: Catalog,
    page_size: usize,

    mode: Mode,
    question_type: Option<QuestionKind>,
    question_id: Option<String>,
    class_name: Option<String>,
    grade_filter: Option<Grade>,
    search_keyword: String,

    sort_field: SortField,
    sort_order: SortOrder,
    current_page: usize,

    phase: Phase,
    token: u64,
    records: Vec<AnswerRecord>,
    degraded_reason: Option<String>,

    dirty: Option<Stage>,
    class_subset: Vec<usize>,
    statistics: DerivedStatistics,
    table_subset: Vec<usize>,
    ordered: Vec<usize>,
    total_pages: usize,
}

impl ReportSession {
    pub fn new(catalog: Catalog, page_size: usize) -> ReportSession {
        let mut session = ReportSession {
            catalog,
            page_size,
            mode: Mode::Practice,
            question_type: None,
            question_id: None,
            class_name: None,
            grade_filter: None,
            search_keyword: String::new(),
            sort_field: SortField::Score,
            sort_order: SortOrder::Desc,
            current_page: 1,
            phase: Phase::Idle,
            token: 0,
            records: Vec::new(),
            degraded_reason: None,
            dirty: Some(Stage::ClassFilter),
            class_subset: Vec::new(),
            statistics: aggregate(&[], &[]),
            table_subset: Vec::new(),
            ordered: Vec::new(),
            total_pages: 1,
        };
        session.recompute();
        session
    }

    fn invalidate(&mut self, stage: Stage) {
        self.dirty = Some(match self.dirty {
            Some(current) => std::cmp::min(current, stage),
            None => stage,
        });
    }

    /// Re-derive the invalidated suffix of the pipeline from cached
    /// intermediates. Page clamping runs unconditionally so the current
    /// page can never be observed out of range.
    fn recompute(&mut self) {
        if let Some(stage) = self.dirty.take() {
            if stage <= Stage::ClassFilter {
                self.class_subset = filter_class(&self.records, self.class_name.as_deref());
                self.statistics = aggregate(&self.records, &self.class_subset);
            }
            if stage <= Stage::DetailFilter {
                self.table_subset = filter_detail(
                    &self.records,
                    &self.class_subset,
                    self.grade_filter,
                    &self.search_keyword,
                );
            }
            if stage <= Stage::Sort {
                self.ordered = sort_records(
                    &self.records,
                    &self.table_subset,
                    self.sort_field,
                    self.sort_order,
                );
            }
        }
        let window = page_window(self.ordered.len(), self.page_size, self.current_page);
        self.current_page = window.page;
        self.total_pages = window.total_pages;
    }

    fn criteria(&self) -> Criteria {
        Criteria {
            mode: self.mode,
            question_type: self.question_type,
            question_id: self.question_id.clone(),
            grade: self.grade_filter,
            search: self.search_keyword.clone(),
        }
    }

    fn issue_fetch(&mut self) -> FetchTicket {
        self.token += 1;
        self.phase = Phase::Loading;
        let ticket = FetchTicket {
            token: self.token,
            criteria: self.criteria(),
        };
        info!(
            "fetch #{} issued (mode={}, question={})",
            ticket.token,
            ticket.criteria.mode.as_str(),
            ticket.criteria.question_id.as_deref().unwrap_or("all")
        );
        ticket
    }

    /// Apply a completed fetch. A response whose token no longer matches the
    /// latest issued fetch is superseded and dropped without touching state.
    /// Failure switches to the fallback set for the ticket's criteria and
    /// stays degraded until the next successful fetch.
    pub fn apply_fetch(&mut self, ticket: &FetchTicket, result: Result<RecordSet, SourceError>) -> bool {
        if ticket.token != self.token {
            debug!(
                "fetch #{} superseded by #{}, response dropped",
                ticket.token, self.token
            );
            return false;
        }
        match result {
            Ok(set) => {
                info!(
                    "fetch #{} applied: {} of {} records retained",
                    ticket.token,
                    set.items.len(),
                    set.total
                );
                self.phase = Phase::Ready;
                self.degraded_reason = None;
                self.records = set.items;
            }
            Err(e) => {
                warn!("fetch #{} failed ({}), serving fallback data", ticket.token, e);
                self.phase = Phase::Degraded;
                self.degraded_reason = Some(e.to_string());
                self.records = fallback_records(&ticket.criteria);
            }
        }
        self.invalidate(Stage::ClassFilter);
        self.recompute();
        true
    }

    /// Mode switch resets the dependent question scope and requires a fetch.
    pub fn set_mode(&mut self, mode: Mode) -> Option<FetchTicket> {
        if self.mode == mode {
            return None;
        }
        self.mode = mode;
        self.question_type = None;
        self.question_id = None;
        Some(self.issue_fetch())
    }

    pub fn set_question_type(
        &mut self,
        question_type: Option<QuestionKind>,
    ) -> Result<Option<FetchTicket>, StateError> {
        if self.mode != Mode::Practice {
            return Err(StateError::new(
                "bad_params",
                "questionType is only selectable in practice mode",
            ));
        }
        if question_type.map(QuestionKind::is_exam).unwrap_or(false) {
            return Err(StateError::new(
                "bad_params",
                "questionType must be a practice type",
            ));
        }
        if self.question_type == question_type {
            return Ok(None);
        }
        self.question_type = question_type;
        self.question_id = None;
        Ok(Some(self.issue_fetch()))
    }

    pub fn set_question(
        &mut self,
        question_id: Option<String>,
    ) -> Result<Option<FetchTicket>, StateError> {
        if let Some(id) = question_id.as_deref() {
            if !self.catalog.is_selectable(id, self.mode, self.question_type) {
                return Err(StateError::new(
                    "bad_params",
                    format!("question {} is not selectable in the current scope", id),
                ));
            }
        }
        if self.question_id == question_id {
            return Ok(None);
        }
        self.question_id = question_id;
        Ok(Some(self.issue_fetch()))
    }

    pub fn set_class(&mut self, class_name: Option<String>) {
        if self.class_name == class_name {
            return;
        }
        self.class_name = class_name;
        self.current_page = 1;
        self.invalidate(Stage::ClassFilter);
        self.recompute();
    }

    pub fn set_grade_filter(&mut self, grade: Option<Grade>) {
        if self.grade_filter == grade {
            return;
        }
        self.grade_filter = grade;
        self.current_page = 1;
        self.invalidate(Stage::DetailFilter);
        self.recompute();
    }

    pub fn set_search(&mut self, keyword: String) {
        if self.search_keyword == keyword {
            return;
        }
        self.search_keyword = keyword;
        self.current_page = 1;
        self.invalidate(Stage::DetailFilter);
        self.recompute();
    }

    /// Same field toggles the direction; a new field starts at desc.
    pub fn set_sort(&mut self, field: SortField) {
        if self.sort_field == field {
            self.sort_order = match self.sort_order {
                SortOrder::Asc => SortOrder::Desc,
                SortOrder::Desc => SortOrder::Asc,
            };
        } else {
            self.sort_field = field;
            self.sort_order = SortOrder::Desc;
        }
        self.current_page = 1;
        self.invalidate(Stage::Sort);
        self.recompute();
    }

    pub fn set_page(&mut self, page: usize) {
        self.current_page = page;
        self.invalidate(Stage::Page);
        self.recompute();
    }

    /// Explicit retry with the current criteria.
    pub fn reload(&mut self) -> FetchTicket {
        self.issue_fetch()
    }

    pub fn questions(&self) -> Vec<&Question> {
        self.catalog.questions_for(self.mode, self.question_type)
    }

    /// Distinct classes present in the fetched set, sorted.
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .records
            .iter()
            .map(|r| r.class_name.clone())
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }

    fn data_state(&self) -> &'static str {
        match self.phase {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Degraded => "degraded",
            Phase::Ready => {
                if self.records.is_empty() {
                    "empty"
                } else {
                    "ready"
                }
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let window = page_window(self.ordered.len(), self.page_size, self.current_page);
        let page_items = self.ordered[window.start..window.end]
            .iter()
            .map(|&i| self.records[i].clone())
            .collect();
        Snapshot {
            data_state: self.data_state(),
            fetched_count: self.records.len(),
            filtered_count: self.ordered.len(),
            statistics: self.statistics.clone(),
            page_items,
            current_page: self.current_page,
            total_pages: self.total_pages,
            page_size: self.page_size,
            sort: SortSnapshot {
                field: self.sort_field.as_str(),
                order: self.sort_order.as_str(),
            },
            filters: FilterSnapshot {
                mode: self.mode.as_str(),
                question_type: self
                    .question_type
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_else(|| "all".to_string()),
                question_id: self.question_id.clone().unwrap_or_else(|| "all".to_string()),
                class_name: self.class_name.clone().unwrap_or_else(|| "all".to_string()),
                grade_filter: self
                    .grade_filter
                    .map(|g| g.as_str().to_string())
                    .unwrap_or_else(|| "all".to_string()),
                search_keyword: self.search_keyword.clone(),
            },
            degraded_reason: self.degraded_reason.clone(),
        }
    }
}
