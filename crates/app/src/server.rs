use crate::error::ApiError;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::StreamExt;
use pdf_chat_core::ingest::validate_upload;
use pdf_chat_core::{
    build_documents, ChatInput, ChatMessage, ChatPipeline, Document, FileSessionStore,
    IngestError, PdfBlobStore, PdfExtractor, Session, SessionStore, UploadedFile,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    pub sessions: Arc<FileSessionStore>,
    pub extractor: Arc<dyn PdfExtractor>,
    pub gateway_available: bool,
    pub default_model: String,
    pub max_files: usize,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/sessions", post(create_session))
        .route("/session/{id}", get(get_session))
        .route("/session/{id}/description", put(update_description))
        .route("/session/{id}/documents", post(add_documents))
        .route("/pdf/{id}/{filename}", get(get_pdf))
        .route("/chat/stream", post(chat_stream))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "pdf-chat listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let gateway = if state.gateway_available {
        "available"
    } else {
        "unavailable"
    };
    Json(json!({ "status": "healthy", "gateway": gateway }))
}

#[derive(Default)]
struct UploadForm {
    description: String,
    files: Vec<UploadedFile>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let bytes = field.bytes().await?;
                form.files.push(UploadedFile::new(filename, &bytes[..]));
            }
            None if name == "description" => form.description = field.text().await?,
            None => debug!(field = %name, "ignoring multipart field"),
        }
    }
    Ok(form)
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    documents: Vec<Document>,
    message: String,
}

async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_upload_form(multipart).await?;
    let documents = build_documents(
        Arc::clone(&state.extractor),
        form.files,
        1,
        state.max_files,
    )
    .await?;

    Ok(Json(UploadResponse {
        message: format!("Successfully processed {} documents", documents.len()),
        documents,
    }))
}

async fn store_upload(
    state: &AppState,
    session_id: &str,
    files: Vec<UploadedFile>,
    first_id: i64,
    existing: &[Document],
) -> Result<Vec<Document>, ApiError> {
    let documents = build_documents(
        Arc::clone(&state.extractor),
        files.clone(),
        first_id,
        state.max_files,
    )
    .await?;

    let mut written = Vec::with_capacity(files.len());
    for file in &files {
        if let Err(error) = state
            .sessions
            .put_pdf(session_id, &file.filename, &file.bytes)
            .await
        {
            // Names already in the session predate this upload.
            let kept: HashSet<&str> = existing.iter().map(|doc| doc.filename.as_str()).collect();
            for filename in written.into_iter().filter(|name| !kept.contains(name)) {
                if let Err(cleanup) = state.sessions.remove_pdf(session_id, filename).await {
                    warn!(session = %session_id, %filename, error = %cleanup, "orphaned pdf");
                }
            }
            return Err(error.into());
        }
        written.push(file.filename.as_str());
    }
    Ok(documents)
}

async fn create_session(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = read_upload_form(multipart).await?;
    validate_upload(&form.files, state.max_files)?;

    let mut session = Session::new(FileSessionStore::new_session_id(), form.description);
    session.documents = store_upload(&state, &session.session_id, form.files, 1, &[]).await?;
    state.sessions.save(&session).await?;

    info!(
        session = %session.session_id,
        documents = session.documents.len(),
        "session created"
    );
    Ok(Json(json!({
        "session_id": session.session_id,
        "message": format!("Session created with {} documents", session.documents.len()),
        "documents": session.documents,
    })))
}

async fn load_session(state: &AppState, session_id: &str) -> Result<Session, ApiError> {
    state
        .sessions
        .get(session_id)
        .await?
        .ok_or_else(ApiError::session_not_found)
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(load_session(&state, &session_id).await?))
}

#[derive(Debug, Deserialize)]
struct DescriptionUpdate {
    description: String,
}

async fn update_description(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<DescriptionUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(update) = payload?;
    let description = update.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("Description cannot be empty".to_string()));
    }

    let mut session = load_session(&state, &session_id).await?;
    session.description = description.to_string();
    state.sessions.save(&session).await?;

    Ok(Json(json!({
        "session_id": session.session_id,
        "description": session.description,
        "message": "Description updated successfully",
    })))
}

async fn add_documents(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut session = load_session(&state, &session_id).await?;
    let form = read_upload_form(multipart).await?;
    validate_upload(&form.files, state.max_files)?;

    let total = session.documents.len() + form.files.len();
    if total > state.max_files {
        return Err(IngestError::TooManyFiles {
            max: state.max_files,
            received: total,
        }
        .into());
    }

    let first_id = session.next_document_id();
    let added =
        store_upload(&state, &session_id, form.files, first_id, &session.documents).await?;
    let count = added.len();
    session.documents.extend(added);
    state.sessions.save(&session).await?;

    Ok(Json(json!({
        "session_id": session.session_id,
        "message": format!("Added {count} documents to session"),
        "new_documents_count": count,
    })))
}

async fn get_pdf(
    State(state): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let bytes = state
        .sessions
        .get_pdf(&session_id, &filename)
        .await
        .map_err(|_| ApiError::NotFound("PDF not found".to_string()))?
        .ok_or_else(|| ApiError::NotFound("PDF not found".to_string()))?;

    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    chat_history: Vec<ChatMessage>,
    model: Option<String>,
    session_id: Option<String>,
}

fn normalize_documents(documents: Vec<Document>) -> Result<Vec<Document>, ApiError> {
    let mut ids = HashSet::with_capacity(documents.len());
    documents
        .into_iter()
        .map(|document| {
            if !ids.insert(document.id) {
                return Err(ApiError::BadRequest(format!(
                    "Duplicate document id: {}",
                    document.id
                )));
            }
            Ok(Document::new(document.id, document.filename, document.pages))
        })
        .collect()
}

async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("Question is required".to_string()));
    }

    let (documents, description) = match &request.session_id {
        Some(session_id) => {
            if !request.documents.is_empty() {
                return Err(ApiError::BadRequest(
                    "Provide either session_id or documents, not both".to_string(),
                ));
            }
            let session = load_session(&state, session_id).await?;
            (session.documents, session.description)
        }
        None => (normalize_documents(request.documents)?, request.description),
    };

    let input = ChatInput {
        question: request.question,
        description,
        documents,
        chat_history: request.chat_history,
        model: request
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| state.default_model.clone()),
        session_id: request.session_id,
    };
    info!(
        documents = input.documents.len(),
        model = %input.model,
        session = input.session_id.as_deref().unwrap_or("-"),
        "chat request accepted"
    );

    let frames = Arc::clone(&state.pipeline)
        .run(input)
        .map(|event| Ok::<_, Infallible>(event.to_sse_frame()));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}
