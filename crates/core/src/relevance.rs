use crate::chunking::{chunk_pages, DEFAULT_PAGE_CHUNK_SIZE};
use crate::error::GatewayError;
use crate::models::{ChatMessage, Document, Page, RelevantPage};
use crate::pricing::PricingTable;
use crate::prompts::{format_history, parse_integer_array};
use crate::traits::LanguageModel;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

pub const OFFLINE_PAGES_PER_DOCUMENT: usize = 3;

pub struct PageRelevanceDetector {
    gateway: Option<Arc<dyn LanguageModel>>,
    pricing: Arc<PricingTable>,
    model: String,
    chunk_size: usize,
}

#[derive(Debug)]
pub struct ChunkReport {
    pub filename: String,
    pub chunk_index: usize,
    pub first_page: Option<Page>,
    pub outcome: Result<(Vec<RelevantPage>, f64), GatewayError>,
}

struct ChunkRequest {
    gateway: Arc<dyn LanguageModel>,
    pricing: Arc<PricingTable>,
    model: String,
    filename: String,
    chunk_index: usize,
    pages: Vec<Page>,
    question: Arc<str>,
    history: Arc<[ChatMessage]>,
}

impl PageRelevanceDetector {
    pub fn new(
        gateway: Option<Arc<dyn LanguageModel>>,
        pricing: Arc<PricingTable>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            pricing,
            model: model.into(),
            chunk_size: DEFAULT_PAGE_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn detect_pages(
        &self,
        document: &Document,
        question: &str,
        history: &[ChatMessage],
    ) -> (Vec<RelevantPage>, f64) {
        self.find_relevant_pages_across_documents(std::slice::from_ref(document), question, history)
            .await
    }

    pub async fn find_relevant_pages_across_documents(
        &self,
        documents: &[Document],
        question: &str,
        history: &[ChatMessage],
    ) -> (Vec<RelevantPage>, f64) {
        if documents.is_empty() {
            return (Vec::new(), 0.0);
        }

        let Some(gateway) = self.gateway.as_ref() else {
            let pages = documents.iter().flat_map(offline_pages).collect::<Vec<_>>();
            debug!(pages = pages.len(), "gateway unavailable, using leading pages");
            return (pages, 0.0);
        };

        let question: Arc<str> = Arc::from(question);
        let history: Arc<[ChatMessage]> = Arc::from(history);
        let mut tasks = JoinSet::new();
        let mut origins: HashMap<Id, (String, usize)> = HashMap::new();

        for document in documents {
            for (chunk_index, pages) in chunk_pages(&document.pages, self.chunk_size)
                .into_iter()
                .enumerate()
            {
                let request = ChunkRequest {
                    gateway: Arc::clone(gateway),
                    pricing: Arc::clone(&self.pricing),
                    model: self.model.clone(),
                    filename: document.filename.clone(),
                    chunk_index,
                    pages,
                    question: Arc::clone(&question),
                    history: Arc::clone(&history),
                };
                let handle = tasks.spawn(evaluate_chunk(request));
                origins.insert(handle.id(), (document.filename.clone(), chunk_index));
            }
        }

        let scheduled = tasks.len();
        let mut relevant = Vec::new();
        let mut total_cost = 0.0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    let (pages, cost) = settle_chunk(report);
                    relevant.extend(pages);
                    total_cost += cost;
                }
                Err(error) => {
                    let (filename, chunk_index) = origins
                        .get(&error.id())
                        .cloned()
                        .unwrap_or_else(|| ("<unknown>".to_string(), 0));
                    warn!(
                        stage = "page_selection",
                        document = %filename,
                        chunk = chunk_index,
                        %error,
                        "relevance task failed, contributing no pages"
                    );
                }
            }
        }

        info!(
            stage = "page_selection",
            documents = documents.len(),
            chunks = scheduled,
            relevant_pages = relevant.len(),
            cost = total_cost,
            "page relevance detection finished"
        );

        (relevant, total_cost)
    }
}

pub fn settle_chunk(report: ChunkReport) -> (Vec<RelevantPage>, f64) {
    match report.outcome {
        Ok(found) => found,
        Err(error) => {
            warn!(
                stage = "page_selection",
                document = %report.filename,
                chunk = report.chunk_index,
                %error,
                "relevance call failed, keeping first page of chunk"
            );
            let fallback = report
                .first_page
                .map(|page| RelevantPage::from_page(&page, &report.filename))
                .into_iter()
                .collect();
            (fallback, 0.0)
        }
    }
}

async fn evaluate_chunk(request: ChunkRequest) -> ChunkReport {
    let started = Instant::now();
    let prompt = build_relevance_prompt(
        &request.filename,
        &request.pages,
        &request.question,
        &request.history,
    );

    let outcome = match request.gateway.complete(&prompt, &request.model).await {
        Ok(completion) => parse_integer_array(&completion.text).map(|numbers| {
            let wanted: HashSet<i64> = numbers.into_iter().collect();
            let pages: Vec<RelevantPage> = request
                .pages
                .iter()
                .filter(|page| wanted.contains(&i64::from(page.page_number)))
                .map(|page| RelevantPage::from_page(page, &request.filename))
                .collect();
            let cost = completion
                .usage
                .map(|usage| request.pricing.cost(&usage, &request.model))
                .unwrap_or(0.0);
            (pages, cost)
        }),
        Err(error) => Err(error),
    };

    debug!(
        document = %request.filename,
        chunk = request.chunk_index,
        pages = request.pages.len(),
        ok = outcome.is_ok(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chunk evaluated"
    );

    ChunkReport {
        first_page: request.pages.first().cloned(),
        filename: request.filename,
        chunk_index: request.chunk_index,
        outcome,
    }
}

fn offline_pages(document: &Document) -> Vec<RelevantPage> {
    document
        .pages
        .iter()
        .take(OFFLINE_PAGES_PER_DOCUMENT)
        .map(|page| RelevantPage::from_page(page, &document.filename))
        .collect()
}

fn build_relevance_prompt(
    filename: &str,
    pages: &[Page],
    question: &str,
    history: &[ChatMessage],
) -> String {
    let pages: Vec<_> = pages
        .iter()
        .map(|page| json!({"page_number": page.page_number, "text": page.text}))
        .collect();
    let pages = serde_json::to_string_pretty(&pages).unwrap_or_else(|_| "[]".to_string());
    let history = format_history("Chat History", history);

    format!(
        "Analyze the following pages from document \"{filename}\" and determine
which pages are relevant to the current question, considering the conversation context.
{history}
Current Question: {question}

Pages:
{pages}

Return a JSON array of page numbers that are relevant to the current question and conversation context.
Return an empty array if none are relevant. Only return the JSON array, no other text.
Example: [1, 3, 5]
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Usage;
    use crate::traits::{Completion, CompletionStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct KeywordModel {
        needle: &'static str,
        failing: Vec<&'static str>,
        panicking: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl KeywordModel {
        fn new(needle: &'static str) -> Self {
            Self {
                needle,
                failing: Vec::new(),
                panicking: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for KeywordModel {
        async fn complete(&self, prompt: &str, _model: &str) -> Result<Completion, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panicking.iter().any(|name| prompt.contains(name)) {
                panic!("simulated crash in relevance task");
            }
            if self.failing.iter().any(|name| prompt.contains(name)) {
                return Err(GatewayError::Stream("provider unavailable".to_string()));
            }

            let pages_json = prompt
                .split("Pages:\n")
                .nth(1)
                .and_then(|rest| rest.split("\n\nReturn").next())
                .unwrap_or("[]");
            let pages: Vec<serde_json::Value> = serde_json::from_str(pages_json).unwrap();
            let hits: Vec<u64> = pages
                .iter()
                .filter(|page| page["text"].as_str().unwrap_or("").contains(self.needle))
                .filter_map(|page| page["page_number"].as_u64())
                .collect();

            Ok(Completion {
                text: serde_json::to_string(&hits).unwrap(),
                usage: Some(Usage {
                    input_tokens: 1_000_000,
                    output_tokens: 0,
                }),
            })
        }

        async fn stream_complete(
            &self,
            _prompt: &str,
            _model: &str,
            _include_usage: bool,
        ) -> Result<CompletionStream, GatewayError> {
            Err(GatewayError::Config("not used".to_string()))
        }
    }

    fn document(id: i64, name: &str, page_count: u32, hit_pages: &[u32]) -> Document {
        let pages = (1..=page_count)
            .map(|number| {
                let text = if hit_pages.contains(&number) {
                    format!("{name} page {number} mentions revenue")
                } else {
                    format!("{name} page {number} filler")
                };
                Page::new(number, text)
            })
            .collect();
        Document::new(id, name, pages)
    }

    fn detector(model: Arc<KeywordModel>) -> PageRelevanceDetector {
        let pricing = Arc::new(PricingTable::empty().with_price("m", 1.0, 1.0));
        PageRelevanceDetector::new(Some(model), pricing, "m")
    }

    fn as_set(pages: &[RelevantPage]) -> HashSet<(String, u32)> {
        pages
            .iter()
            .map(|page| (page.source_document.clone(), page.page_number))
            .collect()
    }

    #[tokio::test]
    async fn chunks_are_evaluated_and_merged() {
        let model = Arc::new(KeywordModel::new("revenue"));
        let doc = document(1, "annual.pdf", 45, &[2, 21, 44]);

        let (pages, cost) = detector(model.clone()).detect_pages(&doc, "revenue?", &[]).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        let expected: HashSet<_> = [2, 21, 44]
            .into_iter()
            .map(|n| ("annual.pdf".to_string(), n))
            .collect();
        assert_eq!(as_set(&pages), expected);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_chunk_falls_back_to_its_first_page() {
        let mut model = KeywordModel::new("revenue");
        model.failing.push("broken.pdf");
        let doc = document(1, "broken.pdf", 25, &[5]);

        let (pages, cost) = detector(Arc::new(model)).detect_pages(&doc, "q", &[]).await;

        let expected: HashSet<_> = [1, 21]
            .into_iter()
            .map(|n| ("broken.pdf".to_string(), n))
            .collect();
        assert_eq!(as_set(&pages), expected);
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn crashing_document_does_not_affect_siblings() {
        let mut model = KeywordModel::new("revenue");
        model.panicking.push("cursed.pdf");
        let docs = vec![
            document(1, "first.pdf", 3, &[1]),
            document(2, "cursed.pdf", 30, &[1, 2, 3]),
            document(3, "third.pdf", 22, &[22]),
        ];

        let (pages, cost) = detector(Arc::new(model))
            .find_relevant_pages_across_documents(&docs, "q", &[])
            .await;

        assert!(pages.iter().all(|page| page.source_document != "cursed.pdf"));
        let expected: HashSet<_> = [("first.pdf".to_string(), 1), ("third.pdf".to_string(), 22)]
            .into_iter()
            .collect();
        assert_eq!(as_set(&pages), expected);
        // first.pdf has one chunk, third.pdf two; cursed.pdf contributes nothing.
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn page_numbers_outside_the_chunk_are_ignored() {
        struct Hallucinating;

        #[async_trait]
        impl LanguageModel for Hallucinating {
            async fn complete(&self, _p: &str, _m: &str) -> Result<Completion, GatewayError> {
                Ok(Completion {
                    text: "[1, 99]".to_string(),
                    usage: None,
                })
            }

            async fn stream_complete(
                &self,
                _p: &str,
                _m: &str,
                _u: bool,
            ) -> Result<CompletionStream, GatewayError> {
                Err(GatewayError::Config("not used".to_string()))
            }
        }

        let detector = PageRelevanceDetector::new(
            Some(Arc::new(Hallucinating)),
            Arc::new(PricingTable::default()),
            "m",
        );
        let (pages, cost) = detector
            .detect_pages(&document(1, "a.pdf", 4, &[]), "q", &[])
            .await;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn no_documents_schedule_no_tasks() {
        let model = Arc::new(KeywordModel::new("revenue"));
        let (pages, cost) = detector(model.clone())
            .find_relevant_pages_across_documents(&[], "q", &[])
            .await;
        assert!(pages.is_empty());
        assert_eq!(cost, 0.0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_gateway_returns_leading_pages() {
        let detector =
            PageRelevanceDetector::new(None, Arc::new(PricingTable::default()), "gpt-5-mini");
        let docs = vec![document(1, "a.pdf", 5, &[]), document(2, "b.pdf", 1, &[])];
        let (pages, cost) = detector
            .find_relevant_pages_across_documents(&docs, "q", &[])
            .await;
        assert_eq!(pages.len(), OFFLINE_PAGES_PER_DOCUMENT + 1);
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn repeated_detection_yields_the_same_set() {
        let model = Arc::new(KeywordModel::new("revenue"));
        let detector = detector(model).with_chunk_size(4);
        let docs = vec![
            document(1, "a.pdf", 10, &[3, 9]),
            document(2, "b.pdf", 7, &[7]),
        ];
        let first = detector.find_relevant_pages_across_documents(&docs, "q", &[]).await;
        let second = detector.find_relevant_pages_across_documents(&docs, "q", &[]).await;
        assert_eq!(as_set(&first.0), as_set(&second.0));
        assert!((first.1 - second.1).abs() < 1e-12);
    }

    #[test]
    fn settle_chunk_without_pages_yields_nothing() {
        let report = ChunkReport {
            filename: "empty.pdf".to_string(),
            chunk_index: 0,
            first_page: None,
            outcome: Err(GatewayError::Decode("bad".to_string())),
        };
        let (pages, cost) = settle_chunk(report);
        assert!(pages.is_empty());
        assert_eq!(cost, 0.0);
    }
}
