use crate::models::DocumentRef;
use serde_json::{json, Value};

pub const TOTAL_STEPS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    DocumentSelection,
    PageSelection,
    AnswerGeneration,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::DocumentSelection => "document_selection",
            Step::PageSelection => "page_selection",
            Step::AnswerGeneration => "answer_generation",
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Step::DocumentSelection => 1,
            Step::PageSelection => 2,
            Step::AnswerGeneration => 3,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Step::DocumentSelection => "Finding relevant documents...",
            Step::PageSelection => "Finding relevant pages in selected documents...",
            Step::AnswerGeneration => "Generating comprehensive answer...",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageBreakdown {
    pub document_selection: f64,
    pub page_detection: f64,
    pub answer_generation: f64,
}

impl StageBreakdown {
    pub fn total(&self) -> f64 {
        self.document_selection + self.page_detection + self.answer_generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status {
        step: Step,
    },
    DocumentsSelected {
        selected: Vec<DocumentRef>,
        cost: f64,
        time_taken: f64,
    },
    PagesSelected {
        relevant_pages_count: usize,
        cost: f64,
        time_taken: f64,
    },
    Content(String),
    Complete {
        timing: StageBreakdown,
        total_time: f64,
        costs: StageBreakdown,
        session_cost: Option<f64>,
    },
    Error(String),
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Status { .. } => "status",
            PipelineEvent::DocumentsSelected { .. } | PipelineEvent::PagesSelected { .. } => {
                "step_complete"
            }
            PipelineEvent::Content(_) => "content",
            PipelineEvent::Complete { .. } => "complete",
            PipelineEvent::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PipelineEvent::Status { step } => json!({
                "type": "status",
                "step": step.as_str(),
                "message": step.message(),
                "step_number": step.number(),
                "total_steps": TOTAL_STEPS,
            }),
            PipelineEvent::DocumentsSelected {
                selected,
                cost,
                time_taken,
            } => json!({
                "type": "step_complete",
                "step": Step::DocumentSelection.as_str(),
                "selected_documents": selected,
                "cost": cost,
                "time_taken": time_taken,
            }),
            PipelineEvent::PagesSelected {
                relevant_pages_count,
                cost,
                time_taken,
            } => json!({
                "type": "step_complete",
                "step": Step::PageSelection.as_str(),
                "relevant_pages_count": relevant_pages_count,
                "cost": cost,
                "time_taken": time_taken,
            }),
            PipelineEvent::Content(content) => json!({
                "type": "content",
                "content": content,
            }),
            PipelineEvent::Complete {
                timing,
                total_time,
                costs,
                session_cost,
            } => {
                let mut body = json!({
                    "type": "complete",
                    "timing_breakdown": {
                        "document_selection": timing.document_selection,
                        "page_detection": timing.page_detection,
                        "answer_generation": timing.answer_generation,
                        "total_time": total_time,
                    },
                    "cost_breakdown": {
                        "document_selection": costs.document_selection,
                        "page_detection": costs.page_detection,
                        "answer_generation": costs.answer_generation,
                        "total_cost": costs.total(),
                    },
                });
                if let (Some(session_cost), Some(map)) = (session_cost, body.as_object_mut()) {
                    map.insert("session_cost".to_string(), json!(session_cost));
                }
                body
            }
            PipelineEvent::Error(error) => json!({
                "type": "error",
                "error": error,
            }),
        }
    }

    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}
