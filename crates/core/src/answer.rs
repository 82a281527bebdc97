use crate::chunking::char_prefix;
use crate::models::{ChatMessage, RelevantPage};
use crate::pricing::PricingTable;
use crate::prompts::format_history;
use crate::traits::{CompletionStream, LanguageModel};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const NO_RELEVANT_INFORMATION: &str =
    "I couldn't find any relevant information to answer your question.";

const PREVIEW_PAGES: usize = 2;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Content(String),
    Cost(f64),
}

pub struct AnswerStreamer {
    gateway: Option<Arc<dyn LanguageModel>>,
    pricing: Arc<PricingTable>,
    fallback_char_delay: Duration,
}

enum Phase {
    Open {
        gateway: Arc<dyn LanguageModel>,
        prompt: String,
        model: String,
    },
    Streaming {
        units: CompletionStream,
        model: String,
    },
    Done,
}

impl AnswerStreamer {
    pub fn new(gateway: Option<Arc<dyn LanguageModel>>, pricing: Arc<PricingTable>) -> Self {
        Self {
            gateway,
            pricing,
            fallback_char_delay: Duration::from_millis(10),
        }
    }

    pub fn with_fallback_char_delay(mut self, delay: Duration) -> Self {
        self.fallback_char_delay = delay;
        self
    }

    pub fn stream_answer(
        &self,
        pages: &[RelevantPage],
        question: &str,
        history: &[ChatMessage],
        model: &str,
    ) -> BoxStream<'static, AnswerEvent> {
        if pages.is_empty() {
            return stream::iter([
                AnswerEvent::Content(NO_RELEVANT_INFORMATION.to_string()),
                AnswerEvent::Cost(0.0),
            ])
            .boxed();
        }

        let Some(gateway) = self.gateway.clone() else {
            return self.offline_preview(pages, question);
        };

        let pricing = Arc::clone(&self.pricing);
        let start = Phase::Open {
            gateway,
            prompt: build_answer_prompt(pages, question, history),
            model: model.to_string(),
        };

        stream::unfold(start, move |phase| {
            let pricing = Arc::clone(&pricing);
            async move { advance(phase, &pricing).await }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    fn offline_preview(
        &self,
        pages: &[RelevantPage],
        question: &str,
    ) -> BoxStream<'static, AnswerEvent> {
        let text = offline_preview_text(pages, question);
        let delay = self.fallback_char_delay;
        stream::iter(text.chars().collect::<Vec<_>>())
            .then(move |character| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                AnswerEvent::Content(character.to_string())
            })
            .chain(stream::once(async { AnswerEvent::Cost(0.0) }))
            .boxed()
    }
}

async fn advance(phase: Phase, pricing: &PricingTable) -> Option<(Vec<AnswerEvent>, Phase)> {
    match phase {
        Phase::Open {
            gateway,
            prompt,
            model,
        } => match gateway.stream_complete(&prompt, &model, true).await {
            Ok(units) => Some((Vec::new(), Phase::Streaming { units, model })),
            Err(error) => {
                warn!(stage = "answer_generation", %error, "answer stream could not be opened");
                Some((failure_events(&error), Phase::Done))
            }
        },
        Phase::Streaming { mut units, model } => match units.next().await {
            Some(Ok(unit)) => {
                let mut events = Vec::with_capacity(2);
                if let Some(usage) = unit.usage {
                    events.push(AnswerEvent::Cost(pricing.cost(&usage, &model)));
                }
                if let Some(delta) = unit.delta.filter(|delta| !delta.is_empty()) {
                    events.push(AnswerEvent::Content(delta));
                }
                Some((events, Phase::Streaming { units, model }))
            }
            Some(Err(error)) => {
                warn!(stage = "answer_generation", %error, "answer stream failed mid-way");
                Some((failure_events(&error), Phase::Done))
            }
            None => {
                debug!(stage = "answer_generation", "answer stream finished");
                None
            }
        },
        Phase::Done => None,
    }
}

fn failure_events(error: &dyn std::fmt::Display) -> Vec<AnswerEvent> {
    vec![
        AnswerEvent::Content(format!("Error generating answer: {error}")),
        AnswerEvent::Cost(0.0),
    ]
}

fn offline_preview_text(pages: &[RelevantPage], question: &str) -> String {
    let mut preview = String::new();
    for page in pages.iter().take(PREVIEW_PAGES) {
        preview.push_str(&format!(
            "From {} (Page {}): {}...\n\n",
            page.source_document,
            page.page_number,
            char_prefix(&page.text, PREVIEW_CHARS)
        ));
    }

    format!(
        "**Language model not configured - showing document preview:**

Question: {question}

Relevant content found:
{preview}
To get AI-powered answers, set OPENAI_API_KEY in the environment or a .env file."
    )
}

fn build_answer_prompt(pages: &[RelevantPage], question: &str, history: &[ChatMessage]) -> String {
    let mut context = String::new();
    for page in pages {
        context.push_str(&format!(
            "\n--- Page {} from {} ---\n{}\n",
            page.page_number, page.source_document, page.text
        ));
    }
    let history = format_history("Conversation History", history);

    format!(
        "Based on the following context from PDF documents and the conversation history, answer the current question.
Provide a comprehensive answer that builds on the conversation and cite which documents and pages you're referencing.

IMPORTANT: When referencing specific pages, use this special format:
$PAGE_START{{filename}}:{{page_numbers}}$PAGE_END

Examples:
- For single page: $PAGE_STARTreport.pdf:5$PAGE_END
- For multiple pages: $PAGE_STARTanalysis.pdf:2,7,12$PAGE_END
- For page range: $PAGE_STARTmanual.pdf:15-18$PAGE_END

Document Context:
{context}{history}
Current Question: {question}

Please provide an answer based on the information in the documents and the conversation context.
If this question relates to previous questions in the conversation, acknowledge that connection.
Use the special page reference format whenever citing specific pages.
"
    )
}
