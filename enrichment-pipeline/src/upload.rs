use std::path::Path;

use common::error::AppError;

/// Extensions the pipelines know how to process.
const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "png", "jpg", "jpeg", "webp", "gif"];

/// Validate an upload by extension, declared MIME type and size before it
/// touches disk.
pub fn validate_upload(
    filename: &str,
    declared_mime: &str,
    size_bytes: u64,
    max_bytes: u64,
) -> Result<(), AppError> {
    if size_bytes == 0 {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }
    if size_bytes > max_bytes {
        return Err(AppError::Validation(format!(
            "File exceeds the {max_bytes} byte upload limit"
        )));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| AppError::Validation("Filename has no extension".into()))?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Validation(format!(
            "File type '.{extension}' is not supported"
        )));
    }

    // The declared MIME type must agree with what the extension implies
    let guessed = mime_guess::from_path(filename).first_or_octet_stream();
    let declared: mime::Mime = declared_mime
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid MIME type '{declared_mime}'")))?;
    if guessed.type_() != declared.type_() {
        return Err(AppError::Validation(format!(
            "Declared type '{declared_mime}' does not match the '.{extension}' extension"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_matching_pdf() {
        assert!(validate_upload("report.pdf", "application/pdf", 1024, 10_000).is_ok());
    }

    #[test]
    fn test_rejects_oversized_and_empty_files() {
        assert!(validate_upload("report.pdf", "application/pdf", 20_000, 10_000).is_err());
        assert!(validate_upload("report.pdf", "application/pdf", 0, 10_000).is_err());
    }

    #[test]
    fn test_rejects_unknown_extension_and_mismatched_mime() {
        assert!(validate_upload("script.exe", "application/pdf", 100, 10_000).is_err());
        assert!(validate_upload("photo.png", "application/pdf", 100, 10_000).is_err());
        assert!(validate_upload("noextension", "text/plain", 100, 10_000).is_err());
    }
}
