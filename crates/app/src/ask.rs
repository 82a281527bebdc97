use futures::StreamExt;
use pdf_chat_core::events::TOTAL_STEPS;
use pdf_chat_core::{
    extract_citations, ingest_folder, ChatInput, ChatPipeline, LopdfExtractor, PipelineEvent,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub struct AskRequest {
    pub folder: String,
    pub question: String,
    pub description: String,
    pub model: String,
}

pub async fn run_ask(pipeline: Arc<ChatPipeline>, request: AskRequest) -> anyhow::Result<()> {
    let report = ingest_folder(Arc::new(LopdfExtractor), Path::new(&request.folder)).await?;
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }
    println!(
        "{} documents loaded from {}",
        report.documents.len(),
        request.folder
    );

    let mut input = ChatInput::new(request.question, report.documents);
    input.description = request.description;
    input.model = request.model;

    let mut stdout = std::io::stdout();
    let mut answer = String::new();
    let mut completed = false;
    let mut events = pipeline.run(input);

    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::Status { step } => {
                println!("[{}/{}] {}", step.number(), TOTAL_STEPS, step.message());
            }
            PipelineEvent::DocumentsSelected {
                selected,
                cost,
                time_taken,
            } => {
                let names: Vec<_> = selected.iter().map(|doc| doc.filename.as_str()).collect();
                println!(
                    "  selected {} document(s) in {time_taken:.2}s (${cost:.4}): {}",
                    names.len(),
                    names.join(", ")
                );
            }
            PipelineEvent::PagesSelected {
                relevant_pages_count,
                cost,
                time_taken,
            } => {
                println!(
                    "  {relevant_pages_count} relevant page(s) in {time_taken:.2}s (${cost:.4})\n"
                );
            }
            PipelineEvent::Content(text) => {
                print!("{text}");
                stdout.flush()?;
                answer.push_str(&text);
            }
            PipelineEvent::Complete {
                total_time, costs, ..
            } => {
                completed = true;
                println!("\n\ntotal_time={total_time:.2}s total_cost=${:.4}", costs.total());
            }
            PipelineEvent::Error(message) => anyhow::bail!("pipeline failed: {message}"),
        }
    }

    if !completed {
        anyhow::bail!("answer stream ended before completing");
    }

    for citation in extract_citations(&answer) {
        let pages: Vec<String> = citation.pages.iter().map(u32::to_string).collect();
        println!("cited: {} pages {}", citation.filename, pages.join(","));
    }

    Ok(())
}
