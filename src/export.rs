use crate::convert::escape_html;
use crate::errors::{AppError, AppResult};
use crate::models::ExportFormat;
use crate::tree::strip_html;
use docx_rs::{Docx, Paragraph, Run};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream, StringFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

static BLOCK_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(?:p|div|h[1-6]|li|blockquote|tr)>|<br\s*/?>").expect("valid block regex")
});

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const FONT_SIZE: i64 = 11;
const LINE_HEIGHT: i64 = 15;
// Line budget in half-width units: ASCII counts 1, everything else 2.
const LINE_UNITS: usize = 86;
// Adobe's standard Chinese CID font; readers supply it, so nothing is embedded.
const PDF_FONT: &str = "STSong-Light";
const PDF_ENCODING: &str = "UniGB-UTF16-H";

/// Writes `html` to `target` in the requested format and returns the final
/// path. The extension is always rewritten to match the format.
pub fn export_document(title: &str, html: &str, format: ExportFormat, target: &Path) -> AppResult<PathBuf> {
    let path = with_format_extension(target, format);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match format {
        ExportFormat::Html => fs::write(&path, html_page(title, html))?,
        ExportFormat::Word => write_docx(title, html, &path)?,
        ExportFormat::Pdf => write_pdf(title, html, &path)?,
    }
    tracing::info!(path = %path.display(), format = format.extension(), "exported document");
    Ok(path)
}

const EXPORT_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "html", "htm"];

fn with_format_extension(target: &Path, format: ExportFormat) -> PathBuf {
    let wanted = format.extension();
    match target.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(wanted) => target.to_path_buf(),
        Some(ext) if EXPORT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => target.with_extension(wanted),
        _ => {
            let mut name = target.as_os_str().to_owned();
            name.push(".");
            name.push(wanted);
            PathBuf::from(name)
        }
    }
}

pub fn html_page(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8"/>
  <title>{}</title>
  <style>
    body {{ font-family: "Noto Sans", "Microsoft YaHei", sans-serif; line-height: 1.8; padding: 24px; }}
    table {{ border-collapse: collapse; width: 100%; }}
    th, td {{ border: 1px solid #e2e8f0; padding: 8px; text-align: left; }}
    img {{ max-width: 100%; }}
  </style>
</head>
<body>{}</body>
</html>
"#,
        escape_html(title),
        body
    )
}

/// Plain-text blocks of the markup, one per paragraph-level element.
pub fn text_blocks(html: &str) -> Vec<String> {
    BLOCK_BREAK_RE
        .split(html)
        .map(strip_html)
        .filter(|block| !block.is_empty())
        .collect()
}

fn write_docx(title: &str, html: &str, path: &Path) -> AppResult<()> {
    let mut docx = Docx::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text(title).bold().size(32)));
    for block in text_blocks(html) {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(block)));
    }
    let file = fs::File::create(path)?;
    docx.build()
        .pack(file)
        .map_err(|error| AppError::Conversion(format!("docx packing failed: {}", error)))
}

/// Title, a blank line, then each text block wrapped and followed by a
/// blank line.
fn pdf_lines(title: &str, html: &str) -> Vec<String> {
    let mut lines = wrap_line(title, LINE_UNITS);
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(String::new());
    for block in text_blocks(html) {
        lines.extend(wrap_line(&block, LINE_UNITS));
        lines.push(String::new());
    }
    lines
}

fn write_pdf(title: &str, html: &str, path: &Path) -> AppResult<()> {
    let lines = pdf_lines(title, html);
    let lines_per_page = ((PAGE_HEIGHT - 2 * MARGIN) / LINE_HEIGHT) as usize;

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = add_unicode_font(&mut doc);
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for chunk in lines.chunks(lines_per_page) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
            Operation::new("TL", vec![LINE_HEIGHT.into()]),
            Operation::new("Td", vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()]),
        ];
        for line in chunk {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(utf16_be_bytes(line), StringFormat::Hexadecimal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path)?;
    Ok(())
}

/// Type0 font over the Adobe-GB1 character collection. Strings shown with it
/// are UTF-16BE, which covers Latin and CJK text alike.
fn add_unicode_font(doc: &mut lopdf::Document) -> lopdf::ObjectId {
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => PDF_FONT,
        "Flags" => 6,
        "FontBBox" => vec![(-25).into(), (-254).into(), 1000.into(), 880.into()],
        "ItalicAngle" => 0,
        "Ascent" => 880,
        "Descent" => -120,
        "CapHeight" => 880,
        "StemV" => 93,
    });
    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => PDF_FONT,
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("GB1"),
            "Supplement" => 4,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
        // Proportional ASCII glyphs.
        "W" => vec![1.into(), 95.into(), 500.into()],
    });
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => format!("{}-{}", PDF_FONT, PDF_ENCODING),
        "Encoding" => PDF_ENCODING,
        "DescendantFonts" => vec![cid_font_id.into()],
    })
}

fn char_units(ch: char) -> usize {
    if ch.is_ascii() {
        1
    } else {
        2
    }
}

/// Greedy word wrap measured in [`char_units`]. Words wider than a line, such
/// as unbroken CJK runs, are split between characters.
fn wrap_line(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for word in text.split_whitespace() {
        let word_units: usize = word.chars().map(char_units).sum();
        if !current.is_empty() && used + 1 + word_units > width {
            lines.push(std::mem::take(&mut current));
            used = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            used += 1;
        }
        for ch in word.chars() {
            let units = char_units(ch);
            if used > 0 && used + units > width {
                lines.push(std::mem::take(&mut current));
                used = 0;
            }
            current.push(ch);
            used += units;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn utf16_be_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_markup_into_text_blocks() {
        let blocks = text_blocks("<h1>Plan</h1><p>One<br/>Two</p><ul><li>a &amp; b</li></ul><p> </p>");
        assert_eq!(blocks, vec!["Plan", "One", "Two", "a & b"]);
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(wrap_line("aa bb cc dd", 5), vec!["aa bb", "cc dd"]);
        assert_eq!(wrap_line("toolongword x", 4), vec!["tool", "ongw", "ord", "x"]);
        assert!(wrap_line("   ", 10).is_empty());
    }

    #[test]
    fn wide_characters_take_two_units() {
        assert_eq!(wrap_line("预算预算预算", 4), vec!["预算", "预算", "预算"]);
        assert_eq!(wrap_line("ab 议题", 5), vec!["ab", "议题"]);
    }

    #[test]
    fn long_titles_are_wrapped_like_body_text() {
        let title = "Quarterly ".repeat(20);
        let lines = pdf_lines(&title, "<p>body</p>");
        let blank = lines.iter().position(String::is_empty).expect("blank after title");
        assert!(blank > 1, "{:?}", lines);
        assert!(lines[..blank].iter().all(|line| line.chars().count() <= LINE_UNITS));
        assert_eq!(lines[blank + 1], "body");
    }

    #[test]
    fn pdf_export_keeps_chinese_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = export_document("会议纪要", "<p>议题：预算</p>", ExportFormat::Pdf, &dir.path().join("minutes"))
            .expect("export");
        let doc = lopdf::Document::load(&path).expect("load");
        let text = doc.extract_text(&[1]).expect("extract");
        assert!(text.contains("会议纪要"), "{:?}", text);
        assert!(text.contains("议题：预算"), "{:?}", text);
        assert!(!text.contains('?'));
    }

    #[test]
    fn html_export_forces_extension_and_wraps_body() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = export_document("A <b>", "<p>body</p>", ExportFormat::Html, &dir.path().join("out.pdf"))
            .expect("export");
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("html"));
        let written = fs::read_to_string(&path).expect("read");
        assert!(written.contains("<title>A &lt;b&gt;</title>"));
        assert!(written.contains("<body><p>body</p></body>"));
    }

    #[test]
    fn dotted_titles_keep_their_full_name() {
        assert_eq!(
            with_format_extension(Path::new("/tmp/v1.2 notes"), ExportFormat::Pdf),
            PathBuf::from("/tmp/v1.2 notes.pdf")
        );
        assert_eq!(
            with_format_extension(Path::new("/tmp/a.DOCX"), ExportFormat::Word),
            PathBuf::from("/tmp/a.DOCX")
        );
    }

    #[test]
    fn word_export_is_a_docx_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = export_document("Report", "<p>Done</p>", ExportFormat::Word, &dir.path().join("report"))
            .expect("export");
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("docx"));
        let archive = zip::ZipArchive::new(fs::File::open(&path).expect("open")).expect("zip");
        assert!(archive.file_names().any(|name| name == "word/document.xml"));
    }

    #[test]
    fn pdf_export_paginates_and_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body: String = (0..120).map(|i| format!("<p>line {}</p>", i)).collect();
        let path = export_document("Long", &body, ExportFormat::Pdf, &dir.path().join("long.pdf")).expect("export");
        let doc = lopdf::Document::load(&path).expect("load");
        assert!(doc.get_pages().len() > 1);
    }
}
