//! Chapter text extraction for the formats a chapter file can arrive in.
//!
//! Plain text and markdown pass through verbatim. HTML keeps its markup
//! (the segmenter knows how to split around tags) but only the `<body>`
//! content is used. DOCX and PDF are reduced to plain UTF-8 text.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Chapter file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterFormat {
    Text,
    Html,
    Docx,
    Pdf,
}

impl ChapterFormat {
    /// Format from a file extension (case-insensitive). Unknown extensions are text.
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("html") | Some("htm") | Some("xhtml") => ChapterFormat::Html,
            Some("docx") => ChapterFormat::Docx,
            Some("pdf") => ChapterFormat::Pdf,
            _ => ChapterFormat::Text,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("chapter is not valid UTF-8")]
    Encoding,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Extract chapter text from raw file bytes.
pub fn extract_text(bytes: &[u8], format: ChapterFormat) -> Result<String, ExtractError> {
    match format {
        ChapterFormat::Text => decode_utf8(bytes),
        ChapterFormat::Html => decode_utf8(bytes).map(|html| html_body(&html).to_string()),
        ChapterFormat::Docx => extract_docx(bytes),
        ChapterFormat::Pdf => extract_pdf(bytes),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
}

/// Inner content of `<body>`, or the whole document when there is none.
pub fn html_body(html: &str) -> &str {
    let lower = html.to_ascii_lowercase();
    let Some(open) = lower.find("<body") else {
        return html;
    };
    let Some(open_end) = lower[open..].find('>').map(|i| open + i + 1) else {
        return html;
    };
    let close = lower[open_end..]
        .find("</body")
        .map(|i| open_end + i)
        .unwrap_or(html.len());
    &html[open_end..close]
}

/// `<title>` text of an HTML document, if any.
pub fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let title = html[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&doc_xml)
}

/// Text of every `w:p`, one paragraph per blank-line-separated block.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
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
    Ok(paragraphs.join("\n\n"))
}
