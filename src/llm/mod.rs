//! Inference server access: HTTP client and model directory.

pub mod models;
pub mod ollama_client;

pub use models::{ModelCatalog, ModelDescriptor, ModelDetails, ModelDirectory, ModelFormat};
pub use ollama_client::{ByteStream, GenerateRequest, Generator, OllamaClient};
