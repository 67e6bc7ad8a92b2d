//! Attachment ingestion.
//!
//! Turns a file on disk into a payload the completion API can consume:
//! images become base64 data URIs, PDFs become their extracted text, and
//! everything else is decoded as text. Nothing here touches the network.

use crate::error::FileError;
use base64::Engine;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PAGE_SEPARATOR: &str = "\n\n--- Page Break ---\n\n";

/// Broad category of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text,
    Code,
    Image,
    Pdf,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Text => "text",
            AttachmentKind::Code => "code",
            AttachmentKind::Image => "image",
            AttachmentKind::Pdf => "pdf",
        }
    }

    /// Instruction sent when the user attached a file without asking anything.
    pub fn fallback_prompt(self) -> &'static str {
        match self {
            AttachmentKind::Text => "Summarize this file.",
            AttachmentKind::Code => "Explain what this code does.",
            AttachmentKind::Image => "Describe this image.",
            AttachmentKind::Pdf => "Summarize this document.",
        }
    }
}

/// A file converted into a provider-consumable payload.
#[derive(Debug)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Size of the file on disk.
    pub size_bytes: u64,
    /// Data URI for images, text for everything else.
    pub payload: String,
    pub mime_type: String,
    pub source_path: PathBuf,
    /// The text payload was cut to fit the size ceiling.
    pub truncated: bool,
}

impl Attachment {
    /// File name used when quoting the attachment to the model.
    pub fn display_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
];

const CODE_TYPES: &[(&str, &str)] = &[
    ("rs", "text/x-rust"),
    ("py", "text/x-python"),
    ("js", "text/javascript"),
    ("jsx", "text/javascript"),
    ("mjs", "text/javascript"),
    ("ts", "text/x-typescript"),
    ("tsx", "text/x-typescript"),
    ("go", "text/x-go"),
    ("java", "text/x-java"),
    ("kt", "text/x-kotlin"),
    ("swift", "text/x-swift"),
    ("c", "text/x-c"),
    ("h", "text/x-c"),
    ("cpp", "text/x-c++"),
    ("cc", "text/x-c++"),
    ("hpp", "text/x-c++"),
    ("cs", "text/x-csharp"),
    ("rb", "text/x-ruby"),
    ("php", "text/x-php"),
    ("lua", "text/x-lua"),
    ("sh", "text/x-shellscript"),
    ("bash", "text/x-shellscript"),
    ("zsh", "text/x-shellscript"),
    ("sql", "text/x-sql"),
    ("html", "text/html"),
    ("css", "text/css"),
];

const TEXT_TYPES: &[(&str, &str)] = &[
    ("md", "text/markdown"),
    ("json", "application/json"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("toml", "application/toml"),
    ("xml", "application/xml"),
    ("csv", "text/csv"),
];

/// Load and encode the file at `path`, refusing anything larger than
/// `max_bytes`.
pub fn ingest(path: &Path, max_bytes: u64) -> Result<Attachment, FileError> {
    let limit_mb = max_bytes / (1024 * 1024);

    let metadata = std::fs::metadata(path).map_err(|e| io_error(path, e))?;
    if !metadata.is_file() {
        return Err(FileError::NotFound(path.to_path_buf()));
    }
    let size_bytes = metadata.len();
    if size_bytes > max_bytes {
        return Err(FileError::TooLarge {
            size_bytes,
            limit_mb,
        });
    }

    // The file may have grown since the stat; never read past the ceiling.
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut bytes = Vec::with_capacity(size_bytes as usize);
    file.take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| io_error(path, e))?;
    if bytes.len() as u64 > max_bytes {
        return Err(FileError::TooLarge {
            size_bytes: bytes.len() as u64,
            limit_mb,
        });
    }

    let (kind, mime_type) = detect_kind(path, &bytes);
    debug!("Detected {} ({}) for {}", kind.as_str(), mime_type, path.display());

    let (payload, truncated) = match kind {
        AttachmentKind::Image => (encode_data_uri(&mime_type, &bytes), false),
        AttachmentKind::Pdf => {
            let text = extract_pdf_text(path, &bytes)?;
            truncate_to(text, max_bytes)
        }
        AttachmentKind::Text | AttachmentKind::Code => {
            let text = decode_text(path, bytes)?;
            truncate_to(text, max_bytes)
        }
    };

    info!(
        "Ingested {} as {} ({} bytes{})",
        path.display(),
        kind.as_str(),
        size_bytes,
        if truncated { ", truncated" } else { "" }
    );

    Ok(Attachment {
        kind,
        size_bytes,
        payload,
        mime_type,
        source_path: path.to_path_buf(),
        truncated,
    })
}

fn io_error(path: &Path, source: std::io::Error) -> FileError {
    if source.kind() == std::io::ErrorKind::NotFound {
        FileError::NotFound(path.to_path_buf())
    } else {
        FileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Classify by extension first, then by magic bytes.
fn detect_kind(path: &Path, bytes: &[u8]) -> (AttachmentKind, String) {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let lookup = |table: &[(&str, &str)]| {
        table
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, mime)| mime.to_string())
    };

    if extension == "pdf" {
        return (AttachmentKind::Pdf, "application/pdf".to_string());
    }
    if let Some(mime) = lookup(IMAGE_TYPES) {
        return (AttachmentKind::Image, mime);
    }
    if let Some(mime) = lookup(CODE_TYPES) {
        return (AttachmentKind::Code, mime);
    }
    if let Some(mime) = lookup(TEXT_TYPES) {
        return (AttachmentKind::Text, mime);
    }
    if let Some(sniffed) = sniff(bytes) {
        return sniffed;
    }
    (AttachmentKind::Text, "text/plain".to_string())
}

fn sniff(bytes: &[u8]) -> Option<(AttachmentKind, String)> {
    let (kind, mime) = if bytes.starts_with(b"%PDF-") {
        (AttachmentKind::Pdf, "application/pdf")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        (AttachmentKind::Image, "image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        (AttachmentKind::Image, "image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        (AttachmentKind::Image, "image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        (AttachmentKind::Image, "image/webp")
    } else {
        return None;
    };
    Some((kind, mime.to_string()))
}

fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime_type, encoded)
}

/// Decode UTF-8, falling back to Latin-1 for legacy text. Content with NUL
/// bytes is treated as binary.
fn decode_text(path: &Path, bytes: Vec<u8>) -> Result<String, FileError> {
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text)),
        Err(e) => {
            let bytes = e.into_bytes();
            if bytes.contains(&0) {
                return Err(FileError::BinaryUnreadable(path.to_path_buf()));
            }
            debug!("{} is not UTF-8, decoding as Latin-1", path.display());
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
    }
}

fn extract_pdf_text(path: &Path, bytes: &[u8]) -> Result<String, FileError> {
    let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| FileError::PdfUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let text = normalize_pdf_text(&raw);
    if text.is_empty() {
        return Err(FileError::PdfNoTextLayer(path.to_path_buf()));
    }
    Ok(text)
}

/// Join non-empty pages (form-feed separated) with a visible page break.
fn normalize_pdf_text(raw: &str) -> String {
    raw.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Cut `text` to at most `max_bytes`, on a character boundary.
fn truncate_to(mut text: String, max_bytes: u64) -> (String, bool) {
    let max = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    if text.len() <= max {
        return (text, false);
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    (text, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LIMIT: u64 = 10 * 1024 * 1024;
    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01";

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let file = File::create(&path).unwrap();
        file.set_len(15 * 1024 * 1024).unwrap();

        let err = ingest(&path, LIMIT).unwrap_err();
        assert!(matches!(
            err,
            FileError::TooLarge {
                size_bytes,
                limit_mb: 10
            } if size_bytes == 15 * 1024 * 1024
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingest(&dir.path().join("nope.txt"), LIMIT).unwrap_err();
        assert!(matches!(err, FileError::NotFound(_)));
    }

    #[test]
    fn test_image_is_data_uri_with_same_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend((0..=255u8).cycle().take(4000));
        let path = write_file(&dir, "photo.png", &bytes);

        let attachment = ingest(&path, LIMIT).unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.size_bytes, bytes.len() as u64);

        let encoded = attachment
            .payload
            .strip_prefix("data:image/png;base64,")
            .expect("data uri prefix");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded.len(), bytes.len());
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_jpeg_extension_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "cat.JPG", &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]);
        let attachment = ingest(&path, LIMIT).unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert!(attachment.payload.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_image_sniffed_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "screenshot", PNG_HEADER);
        let attachment = ingest(&path, LIMIT).unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.mime_type, "image/png");
    }

    #[test]
    fn test_code_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "main.rs", b"fn main() {}\n");
        let attachment = ingest(&path, LIMIT).unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Code);
        assert_eq!(attachment.mime_type, "text/x-rust");
        assert_eq!(attachment.payload, "fn main() {}\n");
        assert_eq!(attachment.display_name(), "main.rs");
    }

    #[test]
    fn test_unknown_extension_is_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.weird", "héllo".as_bytes());
        let attachment = ingest(&path, LIMIT).unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Text);
        assert_eq!(attachment.payload, "héllo");
        assert!(!attachment.truncated);
    }

    #[test]
    fn test_bom_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "bom.txt", b"\xEF\xBB\xBFhello");
        assert_eq!(ingest(&path, LIMIT).unwrap().payload, "hello");
    }

    #[test]
    fn test_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "legacy.txt", b"caf\xE9");
        assert_eq!(ingest(&path, LIMIT).unwrap().payload, "café");
    }

    #[test]
    fn test_binary_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "blob.dat", &[0x00, 0xFF, 0xFE, 0x00, 0x81]);
        let err = ingest(&path, LIMIT).unwrap_err();
        assert!(matches!(err, FileError::BinaryUnreadable(_)));
    }

    #[test]
    fn test_broken_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "document.pdf", b"%PDF-1.4\nnot really a pdf");
        let err = ingest(&path, LIMIT).unwrap_err();
        assert!(matches!(
            err,
            FileError::PdfUnreadable { .. } | FileError::PdfNoTextLayer(_)
        ));
    }

    #[test]
    fn test_normalize_pdf_text() {
        assert_eq!(
            normalize_pdf_text("page one\n\x0c  \x0cpage three\n"),
            format!("page one{}page three", PAGE_SEPARATOR)
        );
        assert!(normalize_pdf_text(" \n\x0c\n").is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let (text, truncated) = truncate_to("aé".to_string(), 2);
        assert_eq!(text, "a");
        assert!(truncated);

        let (text, truncated) = truncate_to("abc".to_string(), 3);
        assert_eq!(text, "abc");
        assert!(!truncated);
    }
}
