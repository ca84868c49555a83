use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// 1-decimal display rounding used for grade rates:
/// `Int(10*x + 0.5) / 10`. Display only, never fed back into arithmetic.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Excellent,
    Pass,
    Low,
}

impl Grade {
    /// Thresholds: >= 90 excellent, >= 60 pass, below that low.
    pub fn from_score(score: f64) -> Grade {
        if score >= 90.0 {
            Grade::Excellent
        } else if score >= 60.0 {
            Grade::Pass
        } else {
            Grade::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Excellent => "excellent",
            Grade::Pass => "pass",
            Grade::Low => "low",
        }
    }

    /// Display label as the console renders it.
    pub fn label(self) -> &'static str {
        match self {
            Grade::Excellent => "优秀",
            Grade::Pass => "及格",
            Grade::Low => "低分",
        }
    }

    /// Accepts both the wire keys and the console's display labels.
    pub fn parse(raw: &str) -> Option<Grade> {
        match raw {
            "excellent" | "优秀" => Some(Grade::Excellent),
            "pass" | "及格" => Some(Grade::Pass),
            "low" | "低分" => Some(Grade::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub record_id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub score: f64,
    pub grade: Grade,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl AnswerRecord {
    pub fn new(
        record_id: impl Into<String>,
        student_id: impl Into<String>,
        student_name: impl Into<String>,
        class_name: impl Into<String>,
        score: f64,
    ) -> AnswerRecord {
        AnswerRecord {
            record_id: record_id.into(),
            student_id: student_id.into(),
            student_name: student_name.into(),
            class_name: class_name.into(),
            score,
            grade: Grade::from_score(score),
            audio_ref: None,
            submitted_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Score,
    Name,
    StudentId,
    Class,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<SortField> {
        match raw {
            "score" => Some(SortField::Score),
            "name" => Some(SortField::Name),
            "studentId" => Some(SortField::StudentId),
            "class" => Some(SortField::Class),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Score => "score",
            SortField::Name => "name",
            SortField::StudentId => "studentId",
            SortField::Class => "class",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Statistics tier: narrow by class only. `None` keeps everything.
pub fn filter_class(records: &[AnswerRecord], class_name: Option<&str>) -> Vec<usize> {
    match class_name {
        None => (0..records.len()).collect(),
        Some(name) => records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.class_name == name)
            .map(|(i, _)| i)
            .collect(),
    }
}

fn matches_keyword(record: &AnswerRecord, keyword_lower: &str) -> bool {
    record.student_name.to_lowercase().contains(keyword_lower)
        || record.student_id.to_lowercase().contains(keyword_lower)
        || record.class_name.to_lowercase().contains(keyword_lower)
}

/// Table tier: narrow the class-filtered subset by grade and search keyword.
/// Conjunctive; an empty keyword matches everything.
pub fn filter_detail(
    records: &[AnswerRecord],
    base: &[usize],
    grade: Option<Grade>,
    keyword: &str,
) -> Vec<usize> {
    let keyword_lower = if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_lowercase())
    };
    base.iter()
        .copied()
        .filter(|&i| {
            let r = &records[i];
            if let Some(g) = grade {
                if r.grade != g {
                    return false;
                }
            }
            match &keyword_lower {
                Some(kw) => matches_keyword(r, kw),
                None => true,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBucket {
    pub grade: Grade,
    pub label: &'static str,
    pub count: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStatistics {
    pub total: usize,
    pub grades: Vec<GradeBucket>,
    pub histogram: Vec<HistogramBin>,
}

const HISTOGRAM_BINS: [(&str, f64, f64); 5] = [
    ("0-60", 0.0, 60.0),
    ("60-70", 60.0, 70.0),
    ("70-80", 70.0, 80.0),
    ("80-90", 80.0, 90.0),
    ("90-100", 90.0, 100.0),
];

/// Bin membership is half-open on the upper edge except the last bin,
/// which includes 100. Every 0..=100 score lands in exactly one bin.
fn bin_index(score: f64) -> usize {
    if score < 60.0 {
        0
    } else if score < 70.0 {
        1
    } else if score < 80.0 {
        2
    } else if score < 90.0 {
        3
    } else {
        4
    }
}

pub fn aggregate(records: &[AnswerRecord], subset: &[usize]) -> DerivedStatistics {
    let total = subset.len();
    let mut grade_counts = [0usize; 3];
    let mut bin_counts = [0usize; 5];
    for &i in subset {
        let r = &records[i];
        let g = match r.grade {
            Grade::Excellent => 0,
            Grade::Pass => 1,
            Grade::Low => 2,
        };
        grade_counts[g] += 1;
        bin_counts[bin_index(r.score)] += 1;
    }

    let rate = |count: usize| {
        if total > 0 {
            round_off_1_decimal(count as f64 / total as f64 * 100.0)
        } else {
            0.0
        }
    };

    let grades = [Grade::Excellent, Grade::Pass, Grade::Low]
        .iter()
        .zip(grade_counts.iter())
        .map(|(&grade, &count)| GradeBucket {
            grade,
            label: grade.label(),
            count,
            rate: rate(count),
        })
        .collect();

    let histogram = HISTOGRAM_BINS
        .iter()
        .zip(bin_counts.iter())
        .map(|(&(label, min, max), &count)| HistogramBin {
            label,
            min,
            max,
            count,
        })
        .collect();

    DerivedStatistics {
        total,
        grades,
        histogram,
    }
}

/// Stable sort over the table-tier subset. Direction reverses the comparator
/// result, never the sequence, so equal keys keep their input order.
pub fn sort_records(
    records: &[AnswerRecord],
    subset: &[usize],
    field: SortField,
    order: SortOrder,
) -> Vec<usize> {
    let mut out = subset.to_vec();
    out.sort_by(|&a, &b| {
        let ra = &records[a];
        let rb = &records[b];
        let ord = match field {
            SortField::Score => ra
                .score
                .partial_cmp(&rb.score)
                .unwrap_or(Ordering::Equal),
            SortField::Name => ra.student_name.cmp(&rb.student_name),
            SortField::StudentId => ra.student_id.cmp(&rb.student_id),
            SortField::Class => ra.class_name.cmp(&rb.class_name),
        };
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
}

/// Clamp the requested page into `[1, total_pages]` and compute the visible
/// half-open slice. `total_pages` is at least 1 even for an empty list.
pub fn page_window(len: usize, page_size: usize, requested_page: usize) -> PageWindow {
    let total_pages = std::cmp::max(1, len.div_ceil(page_size));
    let page = requested_page.clamp(1, total_pages);
    let start = std::cmp::min((page - 1) * page_size, len);
    let end = std::cmp::min(start + page_size, len);
    PageWindow {
        page,
        total_pages,
        start,
        end,
    }
}
