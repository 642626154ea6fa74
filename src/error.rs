// src/error.rs

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load PDF: {0}")]
    PdfLoad(#[from] lopdf::Error),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document has no pages")]
    EmptyDocument,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document analysis failed: {0}")]
    Analysis(String),

    #[error("document analysis still running after {polls} polls")]
    AnalysisTimeout { polls: u32 },

    #[error("chat completion failed: {0}")]
    Chat(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing credential: set the {0} environment variable")]
    MissingCredential(&'static str),

    #[error("no page of the document could be analyzed")]
    NoPagesAnalyzed,
}
