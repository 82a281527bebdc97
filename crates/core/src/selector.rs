use crate::chunking::char_prefix;
use crate::models::{ChatMessage, Document};
use crate::pricing::PricingTable;
use crate::prompts::{format_history, parse_integer_array};
use crate::traits::LanguageModel;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FIRST_PAGE_PREVIEW_CHARS: usize = 500;

pub struct DocumentSelector {
    gateway: Option<Arc<dyn LanguageModel>>,
    pricing: Arc<PricingTable>,
    model: String,
}

impl DocumentSelector {
    pub fn new(
        gateway: Option<Arc<dyn LanguageModel>>,
        pricing: Arc<PricingTable>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            pricing,
            model: model.into(),
        }
    }

    pub async fn select(
        &self,
        description: &str,
        documents: &[Document],
        question: &str,
        history: &[ChatMessage],
    ) -> (Vec<Document>, f64) {
        if documents.is_empty() {
            return (Vec::new(), 0.0);
        }

        let Some(gateway) = self.gateway.as_ref() else {
            debug!(documents = documents.len(), "gateway unavailable, selecting all documents");
            return (documents.to_vec(), 0.0);
        };

        let prompt = build_selection_prompt(description, documents, question, history);
        let completion = match gateway.complete(&prompt, &self.model).await {
            Ok(completion) => completion,
            Err(error) => {
                warn!(
                    stage = "document_selection",
                    %error,
                    "selection call failed, selecting all documents"
                );
                return (documents.to_vec(), 0.0);
            }
        };

        let ids = match parse_integer_array(&completion.text) {
            Ok(ids) => ids.into_iter().collect::<HashSet<_>>(),
            Err(error) => {
                warn!(
                    stage = "document_selection",
                    %error,
                    "unparseable selection, selecting all documents"
                );
                return (documents.to_vec(), 0.0);
            }
        };

        let cost = completion
            .usage
            .map(|usage| self.pricing.cost(&usage, &self.model))
            .unwrap_or(0.0);

        let selected: Vec<Document> = documents
            .iter()
            .filter(|document| ids.contains(&document.id))
            .cloned()
            .collect();

        info!(
            stage = "document_selection",
            selected = selected.len(),
            available = documents.len(),
            cost,
            "documents selected"
        );

        (selected, cost)
    }
}

fn build_selection_prompt(
    description: &str,
    documents: &[Document],
    question: &str,
    history: &[ChatMessage],
) -> String {
    let summaries: Vec<_> = documents
        .iter()
        .map(|document| {
            let preview = document
                .pages
                .first()
                .map(|page| char_prefix(&page.text, FIRST_PAGE_PREVIEW_CHARS))
                .unwrap_or_default();
            json!({
                "id": document.id,
                "filename": document.filename,
                "total_pages": document.total_pages,
                "first_page_preview": preview,
            })
        })
        .collect();
    let summaries =
        serde_json::to_string_pretty(&summaries).unwrap_or_else(|_| "[]".to_string());
    let history = format_history("Chat History", history);

    format!(
        "Based on the following document collection description, chat history, and current question,
select which documents are most likely to contain the answer.

Document Collection Description: {description}

Available Documents:
{summaries}
{history}
Current Question: {question}

Return a JSON array of the ids of the documents most relevant to the current question and conversation context.
Only return the JSON array, no other text.
Example: [1, 3]
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::models::{Page, Usage};
    use crate::traits::{Completion, CompletionStream};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err("boom".to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str, _model: &str) -> Result<Completion, GatewayError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(Completion {
                    text: text.clone(),
                    usage: Some(Usage {
                        input_tokens: 1_000_000,
                        output_tokens: 0,
                    }),
                }),
                Err(message) => Err(GatewayError::Stream(message.clone())),
            }
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

    fn docs() -> Vec<Document> {
        vec![
            Document::new(1, "alpha.pdf", vec![Page::new(1, "alpha intro")]),
            Document::new(2, "beta.pdf", vec![Page::new(1, "beta intro")]),
            Document::new(3, "gamma.pdf", vec![Page::new(1, "gamma intro")]),
        ]
    }

    fn selector(model: Arc<ScriptedModel>) -> DocumentSelector {
        let pricing = Arc::new(PricingTable::empty().with_price("test-model", 1.0, 1.0));
        DocumentSelector::new(Some(model), pricing, "test-model")
    }

    #[tokio::test]
    async fn selection_keeps_original_document_order() {
        let model = Arc::new(ScriptedModel::replying("[3, 1]"));
        let (selected, cost) = selector(model).select("desc", &docs(), "q", &[]).await;

        let ids: Vec<i64> = selected.iter().map(|doc| doc.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!((cost - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn gateway_failure_selects_everything_for_free() {
        let model = Arc::new(ScriptedModel::failing());
        let (selected, cost) = selector(model).select("desc", &docs(), "q", &[]).await;
        assert_eq!(selected, docs());
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn non_json_reply_selects_everything_for_free() {
        let model = Arc::new(ScriptedModel::replying("I think alpha.pdf"));
        let (selected, cost) = selector(model).select("desc", &docs(), "q", &[]).await;
        assert_eq!(selected, docs());
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn prompt_carries_summaries_history_and_question() {
        let model = Arc::new(ScriptedModel::replying("[]"));
        let history = vec![ChatMessage::user("earlier question")];
        selector(model.clone())
            .select("quarterly reports", &docs(), "what about beta?", &history)
            .await;

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.contains("quarterly reports"));
        assert!(prompt.contains("\"filename\": \"beta.pdf\""));
        assert!(prompt.contains("beta intro"));
        assert!(prompt.contains("User: earlier question"));
        assert!(prompt.contains("what about beta?"));
    }

    #[tokio::test]
    async fn empty_collection_makes_no_call() {
        let model = Arc::new(ScriptedModel::replying("[1]"));
        let (selected, cost) = selector(model.clone()).select("d", &[], "q", &[]).await;
        assert!(selected.is_empty());
        assert_eq!(cost, 0.0);
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_gateway_selects_everything() {
        let selector = DocumentSelector::new(None, Arc::new(PricingTable::default()), "gpt-5-mini");
        let (selected, cost) = selector.select("d", &docs(), "q", &[]).await;
        assert_eq!(selected.len(), 3);
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn repeated_selection_is_stable() {
        let model = Arc::new(ScriptedModel::replying("[2]"));
        let selector = selector(model);
        let first = selector.select("d", &docs(), "q", &[]).await;
        let second = selector.select("d", &docs(), "q", &[]).await;
        assert_eq!(first.0, second.0);
    }
}
