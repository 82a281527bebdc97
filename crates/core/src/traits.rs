use crate::error::{GatewayError, StoreError};
use crate::models::{Session, Usage};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamUnit {
    pub delta: Option<String>,
    pub usage: Option<Usage>,
}

pub type CompletionStream = BoxStream<'static, Result<StreamUnit, GatewayError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<Completion, GatewayError>;

    async fn stream_complete(
        &self,
        prompt: &str,
        model: &str,
        include_usage: bool,
    ) -> Result<CompletionStream, GatewayError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    async fn add_session_cost(&self, session_id: &str, cost: f64) -> Result<f64, StoreError>;
}

#[async_trait]
pub trait PdfBlobStore: Send + Sync {
    async fn put_pdf(&self, session_id: &str, filename: &str, bytes: &[u8])
        -> Result<(), StoreError>;

    async fn get_pdf(&self, session_id: &str, filename: &str)
        -> Result<Option<Vec<u8>>, StoreError>;

    async fn remove_pdf(&self, session_id: &str, filename: &str) -> Result<(), StoreError>;
}
