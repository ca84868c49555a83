use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Practice,
    Exam,
}

impl Mode {
    pub fn parse(raw: &str) -> Option<Mode> {
        match raw {
            "practice" => Some(Mode::Practice),
            "exam" => Some(Mode::Exam),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Practice => "practice",
            Mode::Exam => "exam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Imitation,
    Listening,
    Answering,
    Retelling,
    Exam,
}

impl QuestionKind {
    pub fn parse(raw: &str) -> Option<QuestionKind> {
        match raw {
            "imitation" => Some(QuestionKind::Imitation),
            "listening" => Some(QuestionKind::Listening),
            "answering" => Some(QuestionKind::Answering),
            "retelling" => Some(QuestionKind::Retelling),
            "exam" => Some(QuestionKind::Exam),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Imitation => "imitation",
            QuestionKind::Listening => "listening",
            QuestionKind::Answering => "answering",
            QuestionKind::Retelling => "retelling",
            QuestionKind::Exam => "exam",
        }
    }

    pub fn is_exam(self) -> bool {
        self == QuestionKind::Exam
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

impl Question {
    pub fn new(id: &str, title: &str, kind: QuestionKind) -> Question {
        Question {
            id: id.to_string(),
            title: title.to_string(),
            kind,
        }
    }
}

/// Read-only question enumeration consumed from the catalog boundary.
#[derive(Debug, Clone)]
pub struct Catalog {
    questions: Vec<Question>,
}

impl Catalog {
    pub fn new(questions: Vec<Question>) -> Catalog {
        Catalog { questions }
    }

    /// Built-in question set of the console.
    pub fn builtin() -> Catalog {
        Catalog::new(vec![
            Question::new("q1", "Unit 1 - 日常对话练习", QuestionKind::Imitation),
            Question::new("q2", "Unit 2 - 校园生活", QuestionKind::Listening),
            Question::new("q3", "Unit 3 - 家庭话题", QuestionKind::Answering),
            Question::new("q4", "Unit 4 - 综合测试", QuestionKind::Retelling),
            Question::new("exam1", "期中考试 - 综合测试卷", QuestionKind::Exam),
            Question::new("exam2", "期末考试 - 综合测试卷", QuestionKind::Exam),
        ])
    }

    /// Questions selectable under the given mode and practice type.
    /// Exam mode lists exam papers only; practice mode lists practice
    /// questions, optionally narrowed to one type.
    pub fn questions_for(&self, mode: Mode, question_type: Option<QuestionKind>) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| match mode {
                Mode::Exam => q.kind.is_exam(),
                Mode::Practice => {
                    !q.kind.is_exam()
                        && question_type.map(|t| q.kind == t).unwrap_or(true)
                }
            })
            .collect()
    }

    /// Whether `id` is a valid concrete selection under the given scope.
    pub fn is_selectable(&self, id: &str, mode: Mode, question_type: Option<QuestionKind>) -> bool {
        self.questions_for(mode, question_type)
            .iter()
            .any(|q| q.id == id)
    }
}
