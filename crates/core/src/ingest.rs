use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::models::Document;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const MAX_UPLOAD_FILES: usize = 100;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Arc<[u8]>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

pub fn validate_pdf_filename(filename: &str) -> Result<(), IngestError> {
    if filename.is_empty() || filename.contains(['/', '\\', '\0']) || filename.starts_with('.') {
        return Err(IngestError::InvalidFileName(filename.to_string()));
    }
    let is_pdf = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(IngestError::NotPdf(filename.to_string()));
    }
    Ok(())
}

pub fn validate_upload(files: &[UploadedFile], max_files: usize) -> Result<(), IngestError> {
    if files.is_empty() {
        return Err(IngestError::InvalidArgument("no files uploaded".to_string()));
    }
    if files.len() > max_files {
        return Err(IngestError::TooManyFiles {
            max: max_files,
            received: files.len(),
        });
    }
    files
        .iter()
        .try_for_each(|file| validate_pdf_filename(&file.filename))
}

pub async fn extract_document(
    extractor: Arc<dyn PdfExtractor>,
    id: i64,
    file: UploadedFile,
) -> Result<Document, IngestError> {
    let UploadedFile { filename, bytes } = file;
    let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
        .await
        .map_err(|error| {
            IngestError::PdfParse(format!("{filename}: extraction task failed: {error}"))
        })?
        .map_err(|error| match error {
            IngestError::PdfParse(reason) => IngestError::PdfParse(format!("{filename}: {reason}")),
            other => other,
        })?;
    Ok(Document::new(id, filename, pages))
}

pub async fn build_documents(
    extractor: Arc<dyn PdfExtractor>,
    files: Vec<UploadedFile>,
    first_id: i64,
    max_files: usize,
) -> Result<Vec<Document>, IngestError> {
    validate_upload(&files, max_files)?;

    let mut documents = Vec::with_capacity(files.len());
    for (id, file) in (first_id..).zip(files) {
        let document = extract_document(Arc::clone(&extractor), id, file).await?;
        info!(
            document = %document.filename,
            id = document.id,
            pages = document.total_pages,
            "document processed"
        );
        documents.push(document);
    }
    Ok(documents)
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderIngestion {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub async fn ingest_folder(
    extractor: Arc<dyn PdfExtractor>,
    folder: &Path,
) -> Result<FolderIngestion, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();
    let mut next_id = 1;

    for path in files {
        let loaded = async {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| IngestError::InvalidFileName(path.display().to_string()))?
                .to_string();
            let bytes = tokio::fs::read(&path).await?;
            let file = UploadedFile::new(filename, bytes);
            extract_document(Arc::clone(&extractor), next_id, file).await
        }
        .await;

        match loaded {
            Ok(document) => {
                next_id += 1;
                documents.push(document);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(FolderIngestion {
        documents,
        skipped_files,
    })
}
