//! Plain-text extraction for the document formats a library may hold.
//!
//! Each supported [`DocType`] has one strategy. Anything else is refused with
//! [`ExtractError::UnsupportedType`] rather than indexed as empty text.

use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::ExtractError;
use crate::models::DocType;

/// Primary text-flow part of a word-processing archive.
const DOCX_BODY_PART: &str = "word/document.xml";
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// A closing paragraph longer than this is prose, not a dateline.
const DATELINE_MAX_CHARS: usize = 60;
const DATELINE_MAX_WORDS: i64 = 8;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").expect("valid regex"));
static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").expect("valid regex"));

/// Text and derived fields pulled out of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub word_count: i64,
    pub headings: Vec<String>,
    pub dateline: Option<String>,
}

/// Extract a document at `path`, choosing the strategy from its declared type.
pub fn extract_by_type(path: &Path, doc_type: &str) -> Result<ExtractedContent, ExtractError> {
    let kind: DocType = doc_type
        .parse()
        .map_err(|_| ExtractError::UnsupportedType(doc_type.to_string()))?;

    let (text, headings) = match kind {
        DocType::Docx => extract_docx(&std::fs::read(path)?)?,
        DocType::Markdown => extract_markdown(&read_text(path)?),
        DocType::Text => (normalize_whitespace(&read_text(path)?), Vec::new()),
    };

    Ok(ExtractedContent {
        word_count: count_words(&text),
        dateline: find_dateline(&text),
        text,
        headings,
    })
}

/// Collapse runs of horizontal whitespace to one space, keep newlines, trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    HORIZONTAL_WS
        .replace_all(&unified, " ")
        .trim()
        .to_string()
}

/// Count runs of Unicode letters and digits.
pub fn count_words(text: &str) -> i64 {
    WORD.find_iter(text).count() as i64
}

fn read_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn extract_markdown(raw: &str) -> (String, Vec<String>) {
    let mut headings = Vec::new();
    let mut in_fence = false;
    for line in raw.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = MD_HEADING.captures(line) {
            headings.push(normalize_whitespace(&caps[1]));
        }
    }
    (normalize_whitespace(raw), headings)
}

fn extract_docx(bytes: &[u8]) -> Result<(String, Vec<String>), ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY_PART, MAX_XML_ENTRY_BYTES)?;
    parse_docx_body(&xml)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ExtractError::MissingPart(name.to_string()))
        }
        Err(e) => return Err(ExtractError::Archive(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Archive(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Walk the body part paragraph by paragraph.
///
/// `<w:t>` runs are concatenated, `<w:br/>` and `<w:cr/>` become `\n`,
/// paragraphs are trimmed and joined by a blank line. Empty paragraphs are
/// dropped. Text inside nested paragraphs (text boxes) folds into the
/// enclosing one.
fn parse_docx_body(xml: &[u8]) -> Result<(String, Vec<String>), ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs: Vec<String> = Vec::new();
    let mut headings: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_text = false;
    let mut is_heading = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if depth == 0 {
                        current.clear();
                        is_heading = false;
                    }
                    depth += 1;
                }
                b"t" if depth > 0 => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" if depth > 0 => current.push('\n'),
                b"tab" if depth > 0 => current.push('\t'),
                b"pStyle" if depth > 0 => is_heading |= is_heading_style(&e),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        let para = current.trim();
                        if !para.is_empty() {
                            if is_heading {
                                headings.push(normalize_whitespace(para));
                            }
                            paragraphs.push(para.to_string());
                        }
                        current.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok((normalize_whitespace(&paragraphs.join("\n\n")), headings))
}

fn is_heading_style(e: &BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        if a.key.local_name().as_ref() != b"val" {
            return false;
        }
        let style = String::from_utf8_lossy(&a.value).to_ascii_lowercase();
        style.starts_with("heading") || style == "title"
    })
}

/// A short final paragraph carrying a year, e.g. "Lisbon, March 1998".
fn find_dateline(text: &str) -> Option<String> {
    let blocks: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect();
    if blocks.len() < 2 {
        return None;
    }
    let line = blocks[blocks.len() - 1].lines().last()?.trim();
    if line.chars().count() > DATELINE_MAX_CHARS || count_words(line) > DATELINE_MAX_WORDS {
        return None;
    }
    YEAR.is_match(line).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCX_BODY_PART, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn word_count_counts_letter_digit_runs() {
        assert_eq!(count_words("The morning light falls on the water"), 7);
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   \n\t "), 0);
        assert_eq!(count_words("well-known it's 42"), 5);
        assert_eq!(count_words("café naïve"), 2);
    }

    #[test]
    fn normalize_collapses_spaces_but_keeps_newlines() {
        assert_eq!(
            normalize_whitespace("  a \t  b\n\n c\u{a0}\u{a0}d  "),
            "a b\n\n c d"
        );
        assert_eq!(normalize_whitespace("x\r\ny"), "x\ny");
    }

    #[test]
    fn docx_paragraphs_breaks_and_empty_paragraphs() {
        let body = "<w:p><w:r><w:t xml:space=\"preserve\">  First </w:t><w:t>line</w:t></w:r></w:p>\
                    <w:p></w:p>\
                    <w:p><w:r><w:t/></w:r></w:p>\
                    <w:p><w:r><w:t>Second</w:t><w:br/><w:t>stanza &amp; more</w:t></w:r></w:p>";
        let (text, headings) = extract_docx(&docx_with_body(body)).unwrap();
        assert_eq!(text, "First line\n\nSecond\nstanza & more");
        assert!(headings.is_empty());
    }

    #[test]
    fn docx_heading_styles_are_collected() {
        let body = "<w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr><w:r><w:t>Part One</w:t></w:r></w:p>\
                    <w:p><w:r><w:t>Body text.</w:t></w:r></w:p>";
        let (text, headings) = extract_docx(&docx_with_body(body)).unwrap();
        assert_eq!(text, "Part One\n\nBody text.");
        assert_eq!(headings, vec!["Part One".to_string()]);
    }

    #[test]
    fn invalid_zip_is_archive_error() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    #[test]
    fn zip_without_body_part_is_missing_part() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("hello.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hi").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf).unwrap_err();
        assert!(matches!(err, ExtractError::MissingPart(_)));
    }

    #[test]
    fn unsupported_type_fails_before_touching_disk() {
        let err = extract_by_type(Path::new("/nonexistent/file.pdf"), "pdf").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(t) if t == "pdf"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_by_type(Path::new("/nonexistent/file.md"), "md").unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }

    #[test]
    fn markdown_headings_and_dateline() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("poem.md");
        std::fs::write(
            &path,
            "# Harbor\n\nThe boats   lean\ninto the tide.\n\n```\n# not a heading\n```\n\nLisbon, 1998\n",
        )
        .unwrap();
        let content = extract_by_type(&path, "markdown").unwrap();
        assert_eq!(content.headings, vec!["Harbor".to_string()]);
        assert_eq!(content.dateline.as_deref(), Some("Lisbon, 1998"));
        assert!(content.text.contains("The boats lean\ninto the tide."));
    }

    #[test]
    fn single_paragraph_has_no_dateline() {
        assert_eq!(find_dateline("Summer 2004"), None);
        assert_eq!(find_dateline("Body.\n\nNo year here"), None);
    }
}
