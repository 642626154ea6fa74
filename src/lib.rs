//! Turn invoice documents into prompt-ready text for a chat assistant.
//!
//! Pages go through a document-analysis service; the detected tables are
//! rebuilt into header-keyed records (or positional rows when no header was
//! found) and rendered as deterministic text.

pub mod analysis;
pub mod config;
pub mod error;
pub mod invoice;
pub mod llm_chat;
pub mod pdf_pages;
pub mod tables;

pub use error::InvoiceError;
