use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    #[serde(default)]
    pub text: String,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub pages: Vec<Page>,
    pub total_pages: usize,
}

impl Document {
    pub fn new(id: i64, filename: impl Into<String>, pages: Vec<Page>) -> Self {
        let total_pages = pages.len();
        Self {
            id,
            filename: filename.into(),
            pages,
            total_pages,
        }
    }

    pub fn as_ref_summary(&self) -> DocumentRef {
        DocumentRef {
            id: self.id,
            filename: self.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i64,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelevantPage {
    pub page_number: u32,
    pub text: String,
    pub source_document: String,
}

impl RelevantPage {
    pub fn from_page(page: &Page, source_document: &str) -> Self {
        Self {
            page_number: page.page_number,
            text: page.text.clone(),
            source_document: source_document.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn label(self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub description: String,
    pub documents: Vec<Document>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub total_session_cost: f64,
}

impl Session {
    pub fn new(session_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            description: description.into(),
            documents: Vec::new(),
            created_at: Utc::now(),
            total_session_cost: 0.0,
        }
    }

    pub fn next_document_id(&self) -> i64 {
        self.documents.iter().map(|doc| doc.id).max().unwrap_or(0) + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
