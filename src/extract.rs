//! Plain-text extraction for the file formats a profile corpus ships in.
//!
//! Résumés and cover letters usually arrive as PDF or Word documents; notes
//! as Markdown or plain text. The format is chosen from the file extension.

use std::io::Read;
use std::path::Path;

/// Upper bound on a decompressed `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    PlainText,
    Pdf,
    Docx,
}

impl FileFormat {
    /// Pick a format from the extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" => Some(FileFormat::PlainText),
            "pdf" => Some(FileFormat::Pdf),
            "docx" => Some(FileFormat::Docx),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Utf8(std::string::FromUtf8Error),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(p) => write!(f, "unsupported file format: {}", p),
            ExtractError::Utf8(e) => write!(f, "file is not valid UTF-8: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract text from `bytes` read from a file of the given format.
pub fn extract_text(bytes: &[u8], format: FileFormat) -> Result<String, ExtractError> {
    match format {
        FileFormat::PlainText => String::from_utf8(bytes.to_vec()).map_err(ExtractError::Utf8),
        FileFormat::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        FileFormat::Docx => extract_docx(bytes),
    }
}

/// Extract text from the file at `path`, detecting the format by extension.
pub fn extract_file(path: &Path) -> anyhow::Result<String> {
    let format = FileFormat::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    Ok(extract_text(&bytes, format)?)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        paragraphs.push(line.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("cv.PDF")), Some(FileFormat::Pdf));
        assert_eq!(FileFormat::from_path(Path::new("notes.md")), Some(FileFormat::PlainText));
        assert_eq!(FileFormat::from_path(Path::new("letter.docx")), Some(FileFormat::Docx));
        assert_eq!(FileFormat::from_path(Path::new("photo.png")), None);
        assert_eq!(FileFormat::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Machine learning</w:t></w:r><w:r><w:t xml:space="preserve"> engineer</w:t></w:r></w:p>
    <w:p><w:r><w:t>Lagos &amp; remote</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text(&docx_with(xml), FileFormat::Docx).unwrap();
        assert_eq!(text, "Machine learning engineer\nLagos & remote");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", FileFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", FileFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn plain_text_must_be_utf8() {
        assert_eq!(extract_text(b"hello", FileFormat::PlainText).unwrap(), "hello");
        assert!(extract_text(&[0xff, 0xfe, 0x00], FileFormat::PlainText).is_err());
    }
}
