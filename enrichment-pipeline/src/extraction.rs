use std::path::Path;

use common::error::AppError;
use tracing::debug;

/// Extracted text plus page count.
pub struct Extraction {
    pub text: String,
    pub page_count: u32,
}

/// Extract document text by MIME type.
///
/// PDFs go through pdf-extract with page markers reconstructed from form
/// feeds; text-like files are read directly. Anything else is treated as
/// scanned and left to the vision-OCR fallback.
pub fn extract_document_text(path: &Path, mime_type: &str) -> Result<Extraction, AppError> {
    if mime_type == "application/pdf" {
        return extract_pdf(path);
    }
    if mime_type.starts_with("text/") || mime_type == "application/markdown" {
        let text = std::fs::read_to_string(path)?;
        return Ok(Extraction {
            text: sanitize_text(&text),
            page_count: 1,
        });
    }

    Ok(Extraction {
        text: String::new(),
        page_count: 0,
    })
}

fn extract_pdf(path: &Path) -> Result<Extraction, AppError> {
    let raw = pdf_extract::extract_text(path)
        .map_err(|e| AppError::Processing(format!("PDF extraction failed: {e}")))?;

    let page_count = lopdf::Document::load(path)
        .map(|document| document.get_pages().len() as u32)
        .unwrap_or(1)
        .max(1);

    // pdf-extract separates pages with form feeds; rebuild the marker
    // format the chunker understands.
    let text = if raw.contains('\u{c}') {
        raw.split('\u{c}')
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(index, page)| format!("--- Page {} ---\n{}", index + 1, page.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        raw
    };

    debug!(page_count, chars = text.len(), "PDF text extracted");
    Ok(Extraction {
        text: sanitize_text(&text),
        page_count,
    })
}

/// Strip null bytes and stray control characters that upset the database
/// and the embedding backend.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

/// Heuristic for scanned documents: extraction "succeeded" but produced
/// nearly nothing per page.
pub fn looks_scanned(text: &str, page_count: u32) -> bool {
    let meaningful = text.chars().filter(|c| c.is_alphanumeric()).count();
    meaningful < 50 * page_count.max(1) as usize / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plain_text_extraction() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "Hello document\n\nSecond paragraph").expect("write");

        let extraction =
            extract_document_text(file.path(), "text/plain").expect("extract");
        assert_eq!(extraction.page_count, 1);
        assert!(extraction.text.contains("Hello document"));
    }

    #[test]
    fn test_unknown_mime_yields_empty_extraction() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let extraction =
            extract_document_text(file.path(), "image/png").expect("extract");
        assert!(extraction.text.is_empty());
        assert_eq!(extraction.page_count, 0);
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_text("a\u{0}b\u{7}c\nd\te"), "abc\nd\te");
    }

    #[test]
    fn test_looks_scanned() {
        assert!(looks_scanned("", 3));
        assert!(looks_scanned(".. .. ..", 1));
        assert!(!looks_scanned(&"real words here ".repeat(20), 1));
    }
}
