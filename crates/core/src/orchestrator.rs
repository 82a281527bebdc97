use crate::answer::{AnswerEvent, AnswerStreamer};
use crate::chunking::DEFAULT_PAGE_CHUNK_SIZE;
use crate::citation::extract_citations;
use crate::error::PipelineError;
use crate::events::{PipelineEvent, StageBreakdown, Step};
use crate::models::{ChatMessage, Document};
use crate::pricing::PricingTable;
use crate::relevance::PageRelevanceDetector;
use crate::selector::DocumentSelector;
use crate::traits::{LanguageModel, SessionStore};
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

pub const DEFAULT_MODEL: &str = "gpt-5-mini";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    SelectingDocuments,
    SelectingPages,
    GeneratingAnswer,
    Complete,
    Failed,
}

impl PipelineState {
    pub fn successor(self) -> Option<PipelineState> {
        match self {
            PipelineState::Init => Some(PipelineState::SelectingDocuments),
            PipelineState::SelectingDocuments => Some(PipelineState::SelectingPages),
            PipelineState::SelectingPages => Some(PipelineState::GeneratingAnswer),
            PipelineState::GeneratingAnswer => Some(PipelineState::Complete),
            PipelineState::Complete | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub selection_model: String,
    pub fallback_char_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_PAGE_CHUNK_SIZE,
            selection_model: DEFAULT_MODEL.to_string(),
            fallback_char_delay: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub question: String,
    pub description: String,
    pub documents: Vec<Document>,
    pub chat_history: Vec<ChatMessage>,
    pub model: String,
    pub session_id: Option<String>,
}

impl ChatInput {
    pub fn new(question: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            question: question.into(),
            description: String::new(),
            documents,
            chat_history: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            session_id: None,
        }
    }
}

pub struct ChatPipeline {
    selector: DocumentSelector,
    detector: PageRelevanceDetector,
    streamer: AnswerStreamer,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl ChatPipeline {
    pub fn new(
        gateway: Option<Arc<dyn LanguageModel>>,
        pricing: Arc<PricingTable>,
        config: PipelineConfig,
    ) -> Self {
        let selector = DocumentSelector::new(
            gateway.clone(),
            Arc::clone(&pricing),
            config.selection_model.clone(),
        );
        let detector = PageRelevanceDetector::new(
            gateway.clone(),
            Arc::clone(&pricing),
            config.selection_model,
        )
        .with_chunk_size(config.chunk_size);
        let streamer = AnswerStreamer::new(gateway, pricing)
            .with_fallback_char_delay(config.fallback_char_delay);

        Self {
            selector,
            detector,
            streamer,
            sessions: None,
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn run(self: Arc<Self>, input: ChatInput) -> ReceiverStream<PipelineEvent> {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut run = Run {
                state: PipelineState::Init,
                events: sender,
            };
            // A panic in any stage still ends the stream with a single error event.
            let outcome = AssertUnwindSafe(self.execute(&input, &mut run))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Task(panic_message(panic.as_ref()))));
            match outcome {
                Ok(()) => {}
                Err(PipelineError::Disconnected) => {
                    debug!(state = ?run.state, "client went away, pipeline stopped");
                }
                Err(failure) => {
                    error!(state = ?run.state, error = %failure, "pipeline failed");
                    run.state = PipelineState::Failed;
                    let _ = run.emit(PipelineEvent::Error(failure.to_string())).await;
                }
            }
        });
        ReceiverStream::new(receiver)
    }

    async fn execute(&self, input: &ChatInput, run: &mut Run) -> Result<(), PipelineError> {
        let started = Instant::now();
        let mut timing = StageBreakdown::default();
        let mut costs = StageBreakdown::default();

        run.enter(Step::DocumentSelection).await?;
        let stage = Instant::now();
        let (selected, cost) = self
            .selector
            .select(
                &input.description,
                &input.documents,
                &input.question,
                &input.chat_history,
            )
            .await;
        timing.document_selection = stage.elapsed().as_secs_f64();
        costs.document_selection = cost;
        run.emit(PipelineEvent::DocumentsSelected {
            selected: selected.iter().map(Document::as_ref_summary).collect(),
            cost,
            time_taken: timing.document_selection,
        })
        .await?;

        run.enter(Step::PageSelection).await?;
        let stage = Instant::now();
        let (pages, cost) = self
            .detector
            .find_relevant_pages_across_documents(&selected, &input.question, &input.chat_history)
            .await;
        timing.page_detection = stage.elapsed().as_secs_f64();
        costs.page_detection = cost;
        run.emit(PipelineEvent::PagesSelected {
            relevant_pages_count: pages.len(),
            cost,
            time_taken: timing.page_detection,
        })
        .await?;

        run.enter(Step::AnswerGeneration).await?;
        let stage = Instant::now();
        let mut answer = String::new();
        let mut events =
            self.streamer
                .stream_answer(&pages, &input.question, &input.chat_history, &input.model);
        while let Some(event) = events.next().await {
            match event {
                AnswerEvent::Content(text) => {
                    answer.push_str(&text);
                    run.emit(PipelineEvent::Content(text)).await?;
                }
                AnswerEvent::Cost(cost) => costs.answer_generation += cost,
            }
        }
        timing.answer_generation = stage.elapsed().as_secs_f64();

        run.advance();
        let session_cost = match &input.session_id {
            Some(session_id) => Some(self.record_session_cost(session_id, costs.total()).await?),
            None => None,
        };
        let total_time = started.elapsed().as_secs_f64();

        info!(
            total_time,
            total_cost = costs.total(),
            citations = extract_citations(&answer).len(),
            "chat request completed"
        );

        run.emit(PipelineEvent::Complete {
            timing,
            total_time,
            costs,
            session_cost,
        })
        .await
    }

    async fn record_session_cost(&self, session_id: &str, cost: f64) -> Result<f64, PipelineError> {
        let sessions = self.sessions.as_ref().ok_or_else(|| {
            PipelineError::Task(format!("no session store configured for session {session_id}"))
        })?;
        Ok(sessions.add_session_cost(session_id, cost).await?)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct Run {
    state: PipelineState,
    events: mpsc::Sender<PipelineEvent>,
}

impl Run {
    fn advance(&mut self) {
        if let Some(next) = self.state.successor() {
            debug!(from = ?self.state, to = ?next, "pipeline transition");
            self.state = next;
        }
    }

    async fn enter(&mut self, step: Step) -> Result<(), PipelineError> {
        self.advance();
        self.emit(PipelineEvent::Status { step }).await
    }

    async fn emit(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PipelineError::Disconnected)
    }
}
