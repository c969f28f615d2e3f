use crate::errors::AppResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::Path;

static PARAGRAPH_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</w:p>").expect("valid paragraph regex"));
static RUN_PIECE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab\s*/>|<w:br\s*/>").expect("valid run regex")
});
static PARAGRAPH_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<w:pStyle\s+w:val="([^"]+)"\s*/>"#).expect("valid style regex"));
static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("valid space regex"));
static NEWLINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid newline regex"));

const TAB_HTML: &str = "&nbsp;&nbsp;&nbsp;&nbsp;";

/// File extensions `convert_file` turns into markup.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["html", "htm", "docx", "pdf", "txt", "md"];

pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Converts a file on disk into HTML. Returns `Ok(None)` for extensions that
/// are not supported.
pub fn convert_file(path: &Path) -> AppResult<Option<String>> {
    let Some(ext) = extension_of(path) else {
        return Ok(None);
    };
    let html = match ext.as_str() {
        "html" | "htm" => fs::read_to_string(path)?,
        "docx" => docx_to_html(path)?,
        "pdf" => pdf_to_html(path)?,
        "txt" | "md" => text_to_html(&fs::read_to_string(path)?),
        _ => return Ok(None),
    };
    tracing::debug!(path = %path.display(), format = %ext, bytes = html.len(), "converted file");
    Ok(Some(html))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn docx_to_html(path: &Path) -> AppResult<String> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;
    Ok(document_xml_to_html(&xml))
}

/// Maps WordprocessingML paragraphs to HTML blocks. Heading, title and quote
/// paragraph styles get their own elements; everything else becomes `<p>`.
pub fn document_xml_to_html(xml: &str) -> String {
    let mut blocks = String::new();
    for paragraph in PARAGRAPH_END_RE.split(xml) {
        let Some(start) = paragraph.rfind("<w:p>").or_else(|| paragraph.rfind("<w:p ")) else {
            continue;
        };
        let body = &paragraph[start..];

        let mut text = String::new();
        for piece in RUN_PIECE_RE.captures_iter(body) {
            match piece.get(1) {
                Some(run) => text.push_str(&escape_html(&decode_xml_entities(run.as_str()))),
                None if piece[0].starts_with("<w:tab") => text.push_str(TAB_HTML),
                None => text.push_str("<br/>"),
            }
        }
        let text = preserve_spaces(&text);

        let tag = PARAGRAPH_STYLE_RE
            .captures(body)
            .map(|caps| block_tag(&caps[1]))
            .unwrap_or("p");
        blocks.push_str(&format!("<{tag}>{text}</{tag}>"));
    }
    format!("<div class=\"docx-import\">{}</div>", blocks)
}

fn block_tag(style: &str) -> &'static str {
    match style {
        "Heading1" | "Title" => "h1",
        "Heading2" | "Subtitle" => "h2",
        "Quote" => "blockquote",
        _ => "p",
    }
}

/// A run of n spaces keeps its width as n-1 `&nbsp;` plus one breaking space.
fn preserve_spaces(text: &str) -> String {
    SPACE_RUN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{} ", "&nbsp;".repeat(caps[0].len() - 1))
        })
        .into_owned()
}

fn pdf_to_html(path: &Path) -> AppResult<String> {
    let document = lopdf::Document::load(path)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let text = if pages.is_empty() {
        String::new()
    } else {
        document.extract_text(&pages)?
    };
    Ok(format!("<p>{}</p>", NEWLINES_RE.replace_all(&escape_html(text.trim()), "<br/>")))
}

fn text_to_html(text: &str) -> String {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| format!("<p>{}</p>", escape_html(block.trim()).replace('\n', "<br/>")))
        .collect()
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
