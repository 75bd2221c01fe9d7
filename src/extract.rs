//! Per-format text extraction for uploaded documents.
//!
//! The pipeline hands this module a file path; the extension selects the
//! extractor. Structured formats (PDF, DOCX) yield concatenated textual
//! content; plain text and tabular text are read verbatim. Unsupported
//! extensions yield `Ok(None)` so the pipeline can skip them silently.

use std::io::Read;

use anyhow::{Context, Result};
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the textual content of a document, or `None` for an unsupported
/// extension. Parse failures are errors for the caller to handle.
pub fn extract_text(path: &Path) -> Result<Option<String>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let text = match ext.as_str() {
        "pdf" => extract_pdf(path)?,
        "docx" => extract_docx(path)?,
        "txt" | "md" | "csv" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => return Ok(None),
    };

    Ok(Some(text))
}

fn extract_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("PDF extraction failed for {}", path.display()))
}

fn extract_docx(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
        .with_context(|| format!("not a valid DOCX archive: {}", path.display()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .context("word/document.xml not found")?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .context("failed to read word/document.xml")?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            anyhow::bail!("word/document.xml exceeds size limit");
        }
    }

    extract_w_t_elements(&doc_xml)
}

/// Collect the character runs (`w:t` elements) of a DOCX body, one line per
/// paragraph (`w:p`).
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => anyhow::bail!("DOCX body parse failed: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
