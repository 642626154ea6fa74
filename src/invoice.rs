// src/invoice.rs

use crate::analysis::DocumentAnalyzer;
use crate::error::InvoiceError;
use crate::pdf_pages::{self, PageImage};
use crate::tables::{self, AnalyzeResult, DocumentTables, TableIdMode};
use sha2::{Digest, Sha256};
use tracing::{Instrument, error, info};

/// Everything extracted from one uploaded document.
#[derive(Debug, Clone)]
pub struct InvoiceExtraction {
    /// SHA-256 of the uploaded bytes, hex encoded.
    pub fingerprint: String,
    /// Rendered tables of every page, with `--- Page N ---` separators.
    pub text: String,
    pub tables: DocumentTables,
    pub images: Vec<PageImage>,
    pub failed_pages: Vec<u32>,
}

impl InvoiceExtraction {
    /// True when `bytes` are the document this extraction came from.
    pub fn is_same_document(&self, bytes: &[u8]) -> bool {
        fingerprint(bytes) == self.fingerprint
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Analyze every page of a PDF or image and build the grounding context.
///
/// A page whose analysis fails keeps its separator with an empty body and
/// does not stop the remaining pages.
pub async fn analyze_invoice<A>(
    analyzer: &A,
    bytes: &[u8],
    filename: Option<&str>,
    id_mode: TableIdMode,
) -> Result<InvoiceExtraction, InvoiceError>
where
    A: DocumentAnalyzer + ?Sized,
{
    let pages = pdf_pages::split_pages(bytes, filename)?;
    let fingerprint = fingerprint(bytes);
    info!(pages = pages.len(), fingerprint = %fingerprint, "Analyzing invoice");

    let mut text = String::new();
    let mut document_tables = DocumentTables::new(id_mode);
    let mut images = Vec::new();
    let mut failed_pages = Vec::new();

    for page in &pages {
        let span = tracing::info_span!("page", page = page.number);
        span.in_scope(|| info!("--- Analyzing page {} ---", page.number));

        if let Some(image) = &page.image {
            images.push(image.clone());
        }

        let outcome = analyzer.analyze(page).instrument(span.clone()).await;
        let _guard = span.enter();

        let rendered = match outcome {
            Ok(raw) => {
                let result = AnalyzeResult::from_value(&raw);
                let page_tables = tables::reconstruct(&result);
                info!(detected = result.tables.len(), kept = page_tables.len(), "Tables reconstructed");

                let rendered = tables::render(&page_tables);
                document_tables.merge_page(page.number, page_tables);
                rendered
            }
            Err(e) => {
                error!(error = %e, "Page analysis failed");
                failed_pages.push(page.number);
                String::new()
            }
        };

        text.push_str(&format!("\n\n--- Page {} ---\n{rendered}", page.number));
    }

    if failed_pages.len() == pages.len() {
        return Err(InvoiceError::NoPagesAnalyzed);
    }

    Ok(InvoiceExtraction {
        fingerprint,
        text,
        tables: document_tables,
        images,
        failed_pages,
    })
}
