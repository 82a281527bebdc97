pub mod answer;
pub mod chunking;
pub mod citation;
pub mod error;
pub mod events;
pub mod extractor;
pub mod gateways;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod prompts;
pub mod relevance;
pub mod selector;
pub mod stores;
pub mod traits;

pub use answer::{AnswerEvent, AnswerStreamer, NO_RELEVANT_INFORMATION};
pub use chunking::{chunk_pages, DEFAULT_PAGE_CHUNK_SIZE};
pub use citation::{extract_citations, Citation};
pub use error::{GatewayError, IngestError, PipelineError, StoreError};
pub use events::{PipelineEvent, StageBreakdown, Step};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use gateways::{OpenAiConfig, OpenAiGateway};
pub use ingest::{
    build_documents, discover_pdf_files, ingest_folder, validate_upload, FolderIngestion,
    SkippedPdf, UploadedFile, MAX_UPLOAD_FILES,
};
pub use models::{
    ChatMessage, ChatRole, Document, DocumentRef, Page, RelevantPage, Session, Usage,
};
pub use orchestrator::{ChatInput, ChatPipeline, PipelineConfig, PipelineState, DEFAULT_MODEL};
pub use pricing::PricingTable;
pub use relevance::PageRelevanceDetector;
pub use selector::DocumentSelector;
pub use stores::FileSessionStore;
pub use traits::{LanguageModel, PdfBlobStore, SessionStore};
