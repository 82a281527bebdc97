mod ask;
mod error;
mod server;

use ask::{run_ask, AskRequest};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_chat_core::gateways::DEFAULT_BASE_URL;
use pdf_chat_core::{
    ChatPipeline, FileSessionStore, LanguageModel, LopdfExtractor, OpenAiConfig, OpenAiGateway,
    PipelineConfig, PricingTable, DEFAULT_MODEL, DEFAULT_PAGE_CHUNK_SIZE, MAX_UPLOAD_FILES,
};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenAI API key. Without one, answers are document previews.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,

    /// Per-call timeout for language model requests, in seconds
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value = "120")]
    llm_timeout_secs: u64,

    /// Pages per relevance request
    #[arg(long, env = "PDF_CHAT_CHUNK_SIZE", default_value_t = DEFAULT_PAGE_CHUNK_SIZE)]
    chunk_size: usize,

    /// Model used for document and page selection
    #[arg(long, env = "PDF_CHAT_SELECTION_MODEL", default_value = DEFAULT_MODEL)]
    selection_model: String,

    /// Model used for answers when a request names none
    #[arg(long, env = "PDF_CHAT_DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    default_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "PDF_CHAT_BIND", default_value = "0.0.0.0:8000")]
        bind: String,
        /// Where sessions and uploaded PDFs are kept. Defaults to a folder in the temp dir.
        #[arg(long, env = "PDF_CHAT_DATA_DIR")]
        data_dir: Option<PathBuf>,
        #[arg(long, env = "PDF_CHAT_MAX_FILES", default_value_t = MAX_UPLOAD_FILES)]
        max_files: usize,
        #[arg(long, env = "PDF_CHAT_MAX_UPLOAD_BYTES", default_value_t = 200 * 1024 * 1024)]
        max_upload_bytes: usize,
    },
    /// Answer one question over a folder of PDFs.
    Ask {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: String,
        #[arg(long)]
        question: String,
        /// What the collection is about; helps document selection.
        #[arg(long, default_value = "")]
        description: String,
        /// Answer model. Defaults to the configured default model.
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let cli = Cli::parse();

    let gateway_config = OpenAiConfig {
        api_key: cli.openai_api_key.clone(),
        base_url: cli.openai_base_url.clone(),
        timeout: Duration::from_secs(cli.llm_timeout_secs),
    };
    let gateway: Option<Arc<dyn LanguageModel>> =
        match OpenAiGateway::from_config(&gateway_config)? {
            Some(gateway) => Some(Arc::new(gateway)),
            None => {
                warn!("OPENAI_API_KEY not set; answers will be document previews");
                None
            }
        };
    let gateway_available = gateway.is_some();

    let pipeline_config = PipelineConfig {
        chunk_size: cli.chunk_size,
        selection_model: cli.selection_model.clone(),
        ..PipelineConfig::default()
    };
    let pricing = Arc::new(PricingTable::default());
    let pipeline = ChatPipeline::new(gateway, pricing, pipeline_config);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        gateway_available,
        "pdf-chat boot"
    );

    match cli.command {
        Command::Serve {
            bind,
            data_dir,
            max_files,
            max_upload_bytes,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| std::env::temp_dir().join("pdf-chat"));
            tokio::fs::create_dir_all(&data_dir).await?;
            info!(
                data_dir = %data_dir.display(),
                max_files,
                max_upload_bytes,
                "session storage ready"
            );

            let sessions = Arc::new(FileSessionStore::new(data_dir));
            let state = AppState {
                pipeline: Arc::new(pipeline.with_session_store(sessions.clone())),
                sessions,
                extractor: Arc::new(LopdfExtractor),
                gateway_available,
                default_model: cli.default_model,
                max_files,
                max_upload_bytes,
            };
            server::serve(state, &bind).await?;
        }
        Command::Ask {
            folder,
            question,
            description,
            model,
        } => {
            let request = AskRequest {
                folder,
                question,
                description,
                model: model.unwrap_or(cli.default_model),
            };
            run_ask(Arc::new(pipeline), request).await?;
        }
    }

    Ok(())
}
