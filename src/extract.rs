//! Text extractor: dispatch by MIME type to format-specific decoders
//!
//! Every decoder is wrapped so a decoder panic path is never reached and a
//! decode failure degrades to a warning plus an empty string, rather than
//! failing the attachment — only a policy-disabled family returns `None`
//! without invoking any decoder.

use std::collections::HashMap;
use std::io::Read;

use tracing::warn;

/// A format-specific decoder. Implementations never return `Err` to callers
/// outside this module; `extract` catches decoder-level errors at the edge.
trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<String, String>;
}

struct PlainTextDecoder;
impl Decoder for PlainTextDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

struct HtmlDecoder;
impl Decoder for HtmlDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        let html = String::from_utf8_lossy(data);
        html2text::from_read(html.as_bytes(), 2_000)
            .map(|s| s.trim().to_owned())
            .map_err(|e| e.to_string())
    }
}

struct RtfDecoder;
impl Decoder for RtfDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        Ok(decode_rtf(&String::from_utf8_lossy(data)))
    }
}

/// Minimal RTF-to-text state machine: strip control words/groups, honor
/// `\par` and `\tab` as line/tab breaks, drop everything else.
fn decode_rtf(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut depth: i32 = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            '\\' => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphabetic() {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // consume an optional numeric parameter
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '-' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&' ') {
                    chars.next();
                }
                match word.as_str() {
                    "par" | "line" => out.push('\n'),
                    "tab" => out.push('\t'),
                    _ => {}
                }
            }
            _ if depth <= 1 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_owned()
}

struct PdfDecoder;
impl Decoder for PdfDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        pdf_extract::extract_text_from_mem(data).map_err(|e| e.to_string())
    }
}

struct WordDecoder;
impl Decoder for WordDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        let docx = docx_rs::read_docx(data).map_err(|e| format!("{e:?}"))?;
        let mut out = String::new();
        for child in docx.document.children {
            if let docx_rs::DocumentChild::Paragraph(p) = child {
                let mut line = String::new();
                for run in p.children {
                    if let docx_rs::ParagraphChild::Run(r) = run {
                        for rc in r.children {
                            if let docx_rs::RunChild::Text(t) = rc {
                                line.push_str(&t.text);
                            }
                        }
                    }
                }
                if !line.is_empty() {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
        if out.is_empty() {
            Err("no paragraphs found (legacy .doc is best-effort only)".to_owned())
        } else {
            Ok(out.trim().to_owned())
        }
    }
}

/// Best-effort legacy `.doc` (pre-OOXML `application/msword`) scraper: no
/// maintained pure-Rust parser exists in this stack, so this extracts
/// printable runs from the binary and accepts the noise.
struct LegacyDocDecoder;
impl Decoder for LegacyDocDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        let mut out = String::new();
        let mut run = String::new();
        for &byte in data {
            if (0x20..0x7f).contains(&byte) || byte == b'\n' {
                run.push(byte as char);
            } else {
                if run.len() >= 4 {
                    out.push_str(&run);
                    out.push(' ');
                }
                run.clear();
            }
        }
        if run.len() >= 4 {
            out.push_str(&run);
        }
        Ok(out.trim().to_owned())
    }
}

struct OdtDecoder;
impl Decoder for OdtDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        extract_zip_xml_text(data, "content.xml", &["text:p", "text:h"])
    }
}

struct PresentationDecoder;
impl Decoder for PresentationDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(data)).map_err(|e| e.to_string())?;
        let mut slide_names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_owned()))
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .collect();
        slide_names.sort();

        let mut out = String::new();
        for name in slide_names {
            let mut entry = archive.by_name(&name).map_err(|e| e.to_string())?;
            let mut xml = String::new();
            entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
            out.push_str(&collect_xml_tag_text(&xml, &["a:t"]));
            out.push('\n');
        }
        Ok(out.trim().to_owned())
    }
}

fn extract_zip_xml_text(data: &[u8], entry_name: &str, tags: &[&str]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(data)).map_err(|e| e.to_string())?;
    let mut entry = archive.by_name(entry_name).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    Ok(collect_xml_tag_text(&xml, tags))
}

/// Collect the text content of every occurrence of any of `tags`, joined by
/// newlines, walking with a streaming XML reader.
fn collect_xml_tag_text(xml: &str, tags: &[&str]) -> String {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tags
                    .iter()
                    .any(|t| *t == qname || t.as_bytes() == name.as_ref())
                {
                    inside = true;
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tags
                    .iter()
                    .any(|t| *t == qname || t.as_bytes() == name.as_ref())
                {
                    inside = false;
                    out.push('\n');
                }
            }
            Ok(Event::Text(t)) if inside => {
                if let Ok(text) = t.unescape() {
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out.trim().to_owned()
}

struct SpreadsheetDecoder;
impl Decoder for SpreadsheetDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        use calamine::{Reader, open_workbook_auto_from_rs};
        // The three spreadsheet MIMEs this decoder serves are three
        // different container formats (legacy OLE2 `.xls`, OOXML `.xlsx`,
        // ODF `.ods`); sniff the actual format instead of assuming xlsx.
        let cursor = std::io::Cursor::new(data);
        let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| e.to_string())?;
        let mut out = String::new();
        for sheet_name in workbook.sheet_names().to_owned() {
            if let Ok(range) = workbook.worksheet_range(&sheet_name) {
                for row in range.rows() {
                    for cell in row {
                        let text = cell.to_string();
                        if !text.is_empty() {
                            out.push_str(&text);
                            out.push(' ');
                        }
                    }
                    out.push('\n');
                }
            }
        }
        Ok(out.trim().to_owned())
    }
}

#[cfg(feature = "ocr")]
struct ImageOcrDecoder;
#[cfg(feature = "ocr")]
impl Decoder for ImageOcrDecoder {
    fn decode(&self, data: &[u8]) -> Result<String, String> {
        let mut lt = leptess::LepTess::new(None, "eng").map_err(|e| e.to_string())?;
        lt.set_image_from_mem(data).map_err(|e| e.to_string())?;
        lt.get_utf8_text().map_err(|e| e.to_string())
    }
}

/// Decoder registered when the `ocr` feature is off, or when Tesseract is
/// unavailable at runtime: absent decoders return empty rather than erroring.
struct NoOcrDecoder;
impl Decoder for NoOcrDecoder {
    fn decode(&self, _data: &[u8]) -> Result<String, String> {
        Ok(String::new())
    }
}

/// Dispatch table built once at startup, mapping a lower-cased MIME type to
/// its decoder.
pub struct Extractor {
    decoders: HashMap<&'static str, Box<dyn Decoder>>,
}

impl Extractor {
    pub fn new() -> Self {
        let mut decoders: HashMap<&'static str, Box<dyn Decoder>> = HashMap::new();
        decoders.insert("text/plain", Box::new(PlainTextDecoder));
        decoders.insert("text/csv", Box::new(PlainTextDecoder));
        decoders.insert("text/xml", Box::new(PlainTextDecoder));
        decoders.insert("application/json", Box::new(PlainTextDecoder));
        decoders.insert("application/xml", Box::new(PlainTextDecoder));
        decoders.insert("application/csv", Box::new(PlainTextDecoder));
        decoders.insert("text/html", Box::new(HtmlDecoder));
        decoders.insert("application/xhtml+xml", Box::new(HtmlDecoder));
        decoders.insert("application/rtf", Box::new(RtfDecoder));
        decoders.insert("application/pdf", Box::new(PdfDecoder));
        decoders.insert(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Box::new(WordDecoder),
        );
        decoders.insert("application/msword", Box::new(LegacyDocDecoder));
        decoders.insert(
            "application/vnd.oasis.opendocument.text",
            Box::new(OdtDecoder),
        );
        for mime in [
            "application/vnd.ms-excel",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/vnd.oasis.opendocument.spreadsheet",
        ] {
            decoders.insert(mime, Box::new(SpreadsheetDecoder));
        }
        for mime in [
            "application/vnd.ms-powerpoint",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ] {
            decoders.insert(mime, Box::new(PresentationDecoder));
        }

        #[cfg(feature = "ocr")]
        {
            decoders.insert("image/*", Box::new(ImageOcrDecoder));
        }
        #[cfg(not(feature = "ocr"))]
        {
            decoders.insert("image/*", Box::new(NoOcrDecoder));
        }

        Self { decoders }
    }

    /// Extract text for `data` tagged as `mime_type`, truncated to
    /// `max_chars`. Returns `None` if no decoder handles the type.
    /// Never returns `Err`: a decoder exception becomes `Some(String::new())`.
    pub fn extract(&self, data: &[u8], mime_type: &str, max_chars: usize) -> Option<String> {
        let lower = mime_type.to_ascii_lowercase();
        let decoder = if lower.starts_with("image/") {
            self.decoders.get("image/*")
        } else {
            self.decoders.get(lower.as_str())
        }?;

        let text = match decoder.decode(data) {
            Ok(t) => t,
            Err(e) => {
                warn!(mime_type = %lower, error = %e, "text extraction failed, storing empty text");
                String::new()
            }
        };
        Some(crate::canonicalize::truncate_chars(text, max_chars))
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_decodes_lossily() {
        let extractor = Extractor::new();
        let out = extractor.extract(b"hello", "text/plain", 100).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn unknown_mime_returns_none() {
        let extractor = Extractor::new();
        assert!(
            extractor
                .extract(b"binary", "application/octet-stream", 100)
                .is_none()
        );
    }

    #[test]
    fn rtf_strips_control_words_and_keeps_par_as_newline() {
        let out = decode_rtf(r"{\rtf1 Hello\parWorld}");
        assert_eq!(out, "Hello\nWorld");
    }

    #[test]
    fn image_without_ocr_feature_returns_empty_string_not_none() {
        let extractor = Extractor::new();
        let out = extractor.extract(b"\x89PNG", "image/png", 100);
        assert_eq!(out, Some(String::new()));
    }
}
