// src/pdf_pages.rs

use crate::error::InvoiceError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;
use tracing::{debug, info};

/// Formats the analysis service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

impl DocumentFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
        }
    }

    /// Sniff magic bytes, falling back to the file extension.
    pub fn detect(bytes: &[u8], filename: Option<&str>) -> Result<Self, InvoiceError> {
        if let Some(format) = Self::from_magic(bytes) {
            return Ok(format);
        }

        let ext = filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("png") => Ok(Self::Png),
            Some("jpg" | "jpeg") => Ok(Self::Jpeg),
            Some("tif" | "tiff") => Ok(Self::Tiff),
            Some("bmp") => Ok(Self::Bmp),
            _ => Err(InvoiceError::UnsupportedFormat(
                filename.unwrap_or("<unnamed>").to_string(),
            )),
        }
    }

    fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(Self::Pdf)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }
}

/// An image handed to the chat model alongside the extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: u32,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// One page, ready to send to the analysis service.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub number: u32,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
    pub image: Option<PageImage>,
}

/// Split an upload into per-page inputs.
pub fn split_pages(bytes: &[u8], filename: Option<&str>) -> Result<Vec<PageInput>, InvoiceError> {
    let format = DocumentFormat::detect(bytes, filename)?;
    info!(format = ?format, bytes = bytes.len(), "Detected document format");

    let pages = match format {
        DocumentFormat::Pdf => split_pdf(bytes)?,
        image => vec![PageInput {
            number: 1,
            mime: image.mime(),
            bytes: bytes.to_vec(),
            image: Some(PageImage {
                page: 1,
                mime: image.mime(),
                bytes: bytes.to_vec(),
            }),
        }],
    };

    if pages.is_empty() {
        return Err(InvoiceError::EmptyDocument);
    }
    Ok(pages)
}

fn split_pdf(bytes: &[u8]) -> Result<Vec<PageInput>, InvoiceError> {
    let doc = Document::load_mem(bytes)?;
    let pages = doc.get_pages();

    let mut inputs = Vec::with_capacity(pages.len());
    let mut image_only_pages = 0;

    for (&number, &page_id) in &pages {
        // TODO: rasterize text pages too (pdfium-render) so every page has a grounding image.
        let image = scanned_page_image(&doc, page_id).map(|bytes| PageImage {
            page: number,
            mime: DocumentFormat::Jpeg.mime(),
            bytes,
        });
        if image.is_some() {
            image_only_pages += 1;
        }

        let others: Vec<u32> = pages.keys().copied().filter(|&n| n != number).collect();
        let mut single = doc.clone();
        single.delete_pages(&others);
        single.prune_objects();

        let mut buf = Vec::new();
        single.save_to(&mut buf)?;
        debug!(page = number, bytes = buf.len(), "Split page");

        inputs.push(PageInput {
            number,
            mime: DocumentFormat::Pdf.mime(),
            bytes: buf,
            image,
        });
    }

    let total = pages.len();
    let ratio = if total == 0 { 0.0 } else { image_only_pages as f64 / total as f64 };
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    Ok(inputs)
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    doc.dereference(obj)
        .ok()
        .and_then(|(_, resolved)| resolved.as_dict().ok())
}

/// JPEG bytes of a page that holds images but no fonts, i.e. a scanned page.
///
/// Only `DCTDecode` streams qualify: their raw content already is a JPEG file.
fn scanned_page_image(doc: &Document, page_id: ObjectId) -> Option<Vec<u8>> {
    let page_dict = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve_dict(doc, page_dict.get(b"Resources").ok()?)?;

    let has_fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))
        .is_some_and(|fonts| !fonts.is_empty());
    if has_fonts {
        return None;
    }

    let xobjects = resources.get(b"XObject").ok().and_then(|x| resolve_dict(doc, x))?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, obj)| obj.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Image")
        })
        .filter(|stream| is_dct_only(&stream.dict))
        .max_by_key(|stream| stream.content.len())
        .map(|stream| stream.content.clone())
}

fn is_dct_only(dict: &Dictionary) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && filters[0].as_name().is_ok_and(|name| name == b"DCTDecode")
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{Stream, dictionary};

    /// Minimal PDF with `page_count` empty pages, the first optionally image-only.
    pub(crate) fn build_pdf(page_count: usize, scanned_first: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for i in 0..page_count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"q Q".to_vec()));
            let resources = if scanned_first && i == 0 {
                let image_id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Filter" => "DCTDecode",
                        "Width" => 1,
                        "Height" => 1,
                    },
                    vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00],
                ));
                dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
            } else {
                dictionary! {}
            };
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn detects_formats_by_magic_then_extension() {
        assert_eq!(DocumentFormat::detect(b"%PDF-1.7", None).unwrap(), DocumentFormat::Pdf);
        assert_eq!(
            DocumentFormat::detect(b"\x89PNG\r\n\x1a\n....", Some("scan.pdf")).unwrap(),
            DocumentFormat::Png
        );
        assert_eq!(DocumentFormat::detect(b"????", Some("Invoice.JPG")).unwrap(), DocumentFormat::Jpeg);
        assert!(matches!(
            DocumentFormat::detect(b"????", Some("notes.txt")),
            Err(InvoiceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn image_is_single_page_with_grounding_image() {
        let png = b"\x89PNG\r\n\x1a\nrest".to_vec();
        let pages = split_pages(&png, Some("invoice.png")).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].mime, "image/png");
        assert_eq!(pages[0].image.as_ref().map(|i| i.bytes.clone()), Some(png));
    }

    #[test]
    fn pdf_splits_into_single_page_documents() {
        let pdf = build_pdf(3, false);
        let pages = split_pages(&pdf, None).unwrap();
        assert_eq!(pages.iter().map(|p| p.number).collect::<Vec<_>>(), [1, 2, 3]);

        for page in &pages {
            assert_eq!(page.mime, "application/pdf");
            let single = Document::load_mem(&page.bytes).unwrap();
            assert_eq!(single.get_pages().len(), 1);
        }
    }

    #[test]
    fn scanned_page_contributes_jpeg() {
        let pdf = build_pdf(2, true);
        let pages = split_pages(&pdf, None).unwrap();
        let first = pages[0].image.as_ref().unwrap();
        assert_eq!(first.mime, "image/jpeg");
        assert!(first.bytes.starts_with(&[0xFF, 0xD8, 0xFF]));
        assert!(pages[1].image.is_none());
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(split_pages(b"this is not a pdf", None).is_err());
        assert!(matches!(
            split_pages(b"%PDF-garbage", None),
            Err(InvoiceError::PdfLoad(_))
        ));
    }
}
