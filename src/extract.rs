//! Format-fallback text extraction.
//!
//! A closed set of extractor variants is tried in priority order: the cheap
//! [`PlainTextExtractor`] and [`CodeExtractor`] first, then the
//! [`UniversalExtractor`] which understands PDF and OOXML containers and
//! sniffs unknown bytes for text. A file fails only when every capable
//! variant fails or the file exceeds the configured size cap; the run never
//! fails because of one file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::models::ExtractedText;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets read from one xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Bytes sniffed when deciding whether unknown content is text.
const SNIFF_WINDOW: usize = 8192;

/// File-scoped extraction failure. Never aborts the run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("file unreadable: {0}")]
    Unreadable(String),
    #[error("extraction timed out after {0}s")]
    Timeout(u64),
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("corrupt input: {0}")]
    Corrupt(String),
}

/// Capability interface for extractor variants.
pub trait Extractor: Send + Sync {
    /// Tag recorded on the [`ExtractedText`] this variant produces.
    fn name(&self) -> &'static str;
    /// Whether this variant claims the file. Claiming does not guarantee
    /// success; the coordinator falls through on failure.
    fn can_handle(&self, path: &Path) -> bool;
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractionError>;
}

/// Guess a media type from the file extension.
pub fn detect_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" | "rst" | "log" | "csv" | "ini" | "cfg" | "toml" | "yaml" | "yml" | "json" => {
            "text/plain"
        }
        "html" | "htm" => "text/html",
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "go" => "text/x-go",
        "js" | "ts" => "text/x-javascript",
        "java" => "text/x-java",
        "c" | "h" | "cpp" | "hpp" => "text/x-c",
        "sh" | "bash" => "text/x-shellscript",
        _ => "application/octet-stream",
    }
}

/// Check a file's size against the configured cap before reading it.
pub fn ensure_within_size(size: u64, max_file_size: u64) -> Result<(), ExtractionError> {
    if size > max_file_size {
        return Err(ExtractionError::Unreadable(format!(
            "file size {} exceeds max_file_size {}",
            size, max_file_size
        )));
    }
    Ok(())
}

// ============ Plain text ============

/// Fast path for files that are already text.
pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "log", "csv", "json", "yaml", "yml", "toml", "ini", "cfg",
    "html", "htm", "xml", "env", "properties", "lock", "mod", "sum",
];

const TEXT_FILENAMES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "LICENSE",
    "README",
    "CHANGELOG",
    ".gitignore",
    ".gitattributes",
];

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn can_handle(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
        path.file_name()
            .map(|n| TEXT_FILENAMES.contains(&n.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        Ok(decode_text(bytes, self.name()))
    }
}

// ============ Source code ============

/// Fast path for source files; identical decoding, separate tag so the
/// payload records how the text was obtained.
pub struct CodeExtractor;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "cpp", "h", "hpp", "go", "rs", "rb", "php", "swift", "kt",
    "scala", "sh", "bash", "zsh", "ps1", "bat", "sql",
];

impl Extractor for CodeExtractor {
    fn name(&self) -> &'static str {
        "code"
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| CODE_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        Ok(decode_text(bytes, self.name()))
    }
}

fn decode_text(bytes: &[u8], extractor: &'static str) -> ExtractedText {
    let mut warnings = Vec::new();
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warnings.push("invalid UTF-8 sequences replaced".to_string());
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    ExtractedText {
        text,
        extractor,
        title: None,
        warnings,
    }
}

// ============ Universal ============

/// Last-resort extractor: PDF via `pdf-extract`, OOXML containers via
/// `zip` + `quick-xml`, and a text sniff for everything else.
pub struct UniversalExtractor;

impl Extractor for UniversalExtractor {
    fn name(&self) -> &'static str {
        "universal"
    }

    fn can_handle(&self, path: &Path) -> bool {
        path.is_file() || path.extension().is_some()
    }

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let text = match detect_media_type(path) {
            MIME_PDF => extract_pdf(bytes)?,
            MIME_DOCX => extract_docx(bytes)?,
            MIME_PPTX => extract_pptx(bytes)?,
            MIME_XLSX => extract_xlsx(bytes)?,
            media_type => {
                if !looks_like_text(bytes) {
                    return Err(ExtractionError::Unsupported(media_type.to_string()));
                }
                return Ok(decode_text(bytes, self.name()));
            }
        };
        Ok(ExtractedText {
            text,
            extractor: self.name(),
            title: None,
            warnings: Vec::new(),
        })
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if window.contains(&0) {
        return false;
    }
    let printable = window
        .iter()
        .filter(|&&b| b == b'\n' || b == b'\t' || b == b'\r' || (0x20..0x7f).contains(&b) || b >= 0x80)
        .count();
    window.is_empty() || printable * 10 >= window.len() * 9
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractionError::Corrupt(e.to_string()))
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractionError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Corrupt(format!("not a valid OOXML container: {}", e)))
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractionError::Corrupt(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractionError::Corrupt(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Corrupt(format!(
            "ZIP entry {} exceeds {} byte limit",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Collect the text content of every `<t>` element (local name) in an XML
/// document, joined by spaces. Covers `w:t` (docx) and `a:t` (pptx).
fn collect_t_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_t = e.local_name().as_ref() == b"t";
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                let piece = te.unescape().unwrap_or_default();
                if !piece.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(piece.as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(_)) => {
                in_t = false;
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    collect_t_text(&xml)
}

/// List container entries matching `prefix<N>.xml`, sorted by N.
fn numbered_entries(
    archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut out = String::new();
    for name in slides {
        let xml = read_zip_entry(&mut archive, &name)?;
        let text = collect_t_text(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = String::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry(&mut archive, &name)?;
        let cells = extract_sheet_cells(&xml, &shared)?;
        if !out.is_empty() && !cells.is_empty() {
            out.push(' ');
        }
        out.push_str(&cells);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractionError> {
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => in_si = true,
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                strings.push(te.unescape().unwrap_or_default().into_owned());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"si" => in_si = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractionError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_ref = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_ref = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let value = te.unescape().unwrap_or_default();
                let value = value.trim();
                if shared_ref {
                    if let Ok(i) = value.parse::<usize>() {
                        if let Some(s) = shared.get(i) {
                            cells.push(s.clone());
                        }
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => shared_ref = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

// ============ Coordinator ============

/// Tries extractor variants in priority order, falling through on failure.
pub struct ExtractionCoordinator {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractionCoordinator {
    /// Priority order: cheap text paths first, universal last.
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(PlainTextExtractor),
                Box::new(CodeExtractor),
                Box::new(UniversalExtractor),
            ],
        }
    }

    /// Run the fallback chain over already-read bytes.
    ///
    /// An extractor that succeeds but yields only whitespace counts as a
    /// failure and the chain continues. The error returned when every
    /// capable variant fails is the last failure observed.
    pub fn extract(&self, path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let mut last_err: Option<ExtractionError> = None;

        for extractor in &self.extractors {
            if !extractor.can_handle(path) {
                continue;
            }
            match extractor.extract(path, bytes) {
                Ok(extracted) if !extracted.text.trim().is_empty() => {
                    tracing::debug!(
                        path = %path.display(),
                        extractor = extractor.name(),
                        chars = extracted.text.len(),
                        "extracted"
                    );
                    return Ok(extracted);
                }
                Ok(_) => {
                    last_err = Some(ExtractionError::Corrupt("no text extracted".to_string()));
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        extractor = extractor.name(),
                        error = %e,
                        "extractor failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ExtractionError::Unsupported(detect_media_type(path).to_string())
        }))
    }
}

impl Default for ExtractionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Run extraction on a blocking thread, bounded by the configured timeout.
///
/// A hang converts into [`ExtractionError::Timeout`] instead of stalling
/// the run.
pub async fn extract_with_timeout(
    coordinator: Arc<ExtractionCoordinator>,
    path: PathBuf,
    bytes: Vec<u8>,
    timeout_secs: u64,
) -> Result<ExtractedText, ExtractionError> {
    let task = tokio::task::spawn_blocking(move || coordinator.extract(&path, &bytes));

    match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ExtractionError::Corrupt(format!(
            "extraction task panicked: {}",
            join_err
        ))),
        Err(_) => Err(ExtractionError::Timeout(timeout_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_claims_known_extensions() {
        assert!(PlainTextExtractor.can_handle(Path::new("notes.md")));
        assert!(PlainTextExtractor.can_handle(Path::new("Makefile")));
        assert!(!PlainTextExtractor.can_handle(Path::new("photo.png")));
    }

    #[test]
    fn code_claims_source_extensions() {
        assert!(CodeExtractor.can_handle(Path::new("main.rs")));
        assert!(CodeExtractor.can_handle(Path::new("script.py")));
        assert!(!CodeExtractor.can_handle(Path::new("notes.md")));
    }

    #[test]
    fn coordinator_prefers_plain_text_for_markdown() {
        let coordinator = ExtractionCoordinator::new();
        let out = coordinator
            .extract(Path::new("doc.md"), b"# Title\n\nBody text here.")
            .unwrap();
        assert_eq!(out.extractor, "plain_text");
        assert!(out.text.contains("Body text here."));
    }

    #[test]
    fn coordinator_tags_code() {
        let coordinator = ExtractionCoordinator::new();
        let out = coordinator
            .extract(Path::new("lib.rs"), b"fn answer() -> u32 { 42 }")
            .unwrap();
        assert_eq!(out.extractor, "code");
    }

    #[test]
    fn invalid_pdf_is_corrupt() {
        let coordinator = ExtractionCoordinator::new();
        let err = coordinator
            .extract(Path::new("bad.pdf"), b"not a pdf at all")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }

    #[test]
    fn invalid_docx_is_corrupt() {
        let coordinator = ExtractionCoordinator::new();
        let err = coordinator
            .extract(Path::new("bad.docx"), b"not a zip")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }

    #[test]
    fn binary_blob_is_unsupported() {
        let coordinator = ExtractionCoordinator::new();
        let bytes = [0u8, 159, 146, 150, 0, 1, 2, 3];
        let err = coordinator
            .extract(Path::new("blob.bin"), &bytes)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Unsupported(_)));
    }

    #[test]
    fn unknown_extension_with_text_content_sniffs_as_text() {
        let coordinator = ExtractionCoordinator::new();
        let out = coordinator
            .extract(Path::new("notes.unknown"), b"perfectly ordinary text content")
            .unwrap();
        assert_eq!(out.extractor, "universal");
    }

    #[test]
    fn lossy_decode_records_a_warning() {
        let mut bytes = b"mostly text ".to_vec();
        bytes.push(0xff);
        let out = decode_text(&bytes, "plain_text");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn empty_extraction_fails_the_chain() {
        let coordinator = ExtractionCoordinator::new();
        let err = coordinator
            .extract(Path::new("empty.txt"), b"   \n  ")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }

    #[test]
    fn size_cap_rejects_before_read() {
        assert!(ensure_within_size(10, 100).is_ok());
        assert!(matches!(
            ensure_within_size(101, 100),
            Err(ExtractionError::Unreadable(_))
        ));
    }

    #[test]
    fn docx_text_roundtrip() {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer
                .write_all(
                    b"<?xml version=\"1.0\"?>\
                      <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
                      <w:body><w:p><w:r><w:t>office fixture phrase</w:t></w:r></w:p></w:body>\
                      </w:document>",
                )
                .unwrap();
            writer.finish().unwrap();
        }

        let coordinator = ExtractionCoordinator::new();
        let out = coordinator.extract(Path::new("doc.docx"), &buf).unwrap();
        assert_eq!(out.extractor, "universal");
        assert!(out.text.contains("office fixture phrase"));
    }

    #[tokio::test]
    async fn timeout_wrapper_passes_through_success() {
        let coordinator = Arc::new(ExtractionCoordinator::new());
        let out = extract_with_timeout(
            coordinator,
            PathBuf::from("doc.txt"),
            b"some text body".to_vec(),
            5,
        )
        .await
        .unwrap();
        assert_eq!(out.text, "some text body");
    }
}
