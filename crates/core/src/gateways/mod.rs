pub mod openai;

pub use openai::{OpenAiConfig, OpenAiGateway, DEFAULT_BASE_URL, PLACEHOLDER_API_KEY};
