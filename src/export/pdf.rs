//! Paginated PDF composition.
//!
//! The book HTML document is reduced to a block stream, wrapped into lines
//! against the text column, and emitted page by page as PDF content
//! streams over the base-14 Times family. Width calculations use an
//! approximate per-glyph table; exact metrics are not needed for book
//! body text. Output contains no timestamps, so identical input produces
//! identical bytes.

use crate::db::Project;
use crate::error::{AppError, Result};
use crate::export::html::{PageDimensions, mm_to_pt, page_dimensions};
use crate::export::markup::{BlockKind, TextBlock, extract_blocks};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, StringFormat, dictionary};

/// Composition options derived from the project configuration.
#[derive(Debug, Clone)]
pub struct PdfOptions {
    /// Physical page size.
    pub page: PageDimensions,
    /// Top margin in points.
    pub margin_top_pt: f64,
    /// Bottom margin in points.
    pub margin_bottom_pt: f64,
    /// Binding-side margin in points (left margin plus gutter).
    pub margin_inner_pt: f64,
    /// Outer margin in points.
    pub margin_outer_pt: f64,
    /// Body font size in points.
    pub body_size_pt: f64,
    /// Line height as a multiple of the font size.
    pub line_factor: f64,
    /// Draw a centered page number in the bottom margin.
    pub include_page_numbers: bool,
    /// Running header text drawn in the top margin.
    pub header_title: Option<String>,
}

impl PdfOptions {
    /// Build options from a project's geometry and typography settings.
    pub fn from_project(project: &Project) -> Self {
        Self {
            page: page_dimensions(project),
            margin_top_pt: mm_to_pt(project.margin_top_mm as f64),
            margin_bottom_pt: mm_to_pt(project.margin_bottom_mm as f64),
            margin_inner_pt: mm_to_pt((project.margin_left_mm + project.margin_gutter_mm) as f64),
            margin_outer_pt: mm_to_pt(project.margin_right_mm as f64),
            body_size_pt: project.font_size_pt as f64,
            line_factor: (project.line_height_percent as f64 / 100.0).max(1.0),
            include_page_numbers: true,
            header_title: Some(project.title.clone()),
        }
    }

    fn column_width(&self) -> f64 {
        self.page.width_pt - self.margin_inner_pt - self.margin_outer_pt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Italic,
}

impl Face {
    fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
            Face::Italic => "F3",
        }
    }
}

/// A line placed on a page, in page coordinates (origin bottom-left).
#[derive(Debug, Clone)]
struct PlacedLine {
    x: f64,
    y: f64,
    size: f64,
    face: Face,
    text: String,
}

/// Approximate advance width of one glyph as a fraction of the font size.
fn glyph_factor(c: char) -> f64 {
    match c {
        ' ' => 0.25,
        'i' | 'j' | 'l' | 't' | 'f' | 'r' | 'I' => 0.30,
        'm' | 'w' | 'M' | 'W' => 0.78,
        '.' | ',' | ';' | ':' | '!' | '\'' | '|' | '(' | ')' | '[' | ']' => 0.30,
        '0'..='9' => 0.50,
        'A'..='Z' => 0.67,
        _ => 0.48,
    }
}

fn text_width(text: &str, size: f64) -> f64 {
    text.chars().map(|c| glyph_factor(c) * size).sum()
}

/// Greedy word wrap against a column width. A word wider than the column
/// is emitted on its own line rather than split.
fn wrap(text: &str, size: f64, first_width: f64, rest_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut width_limit = first_width;

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };

        if text_width(&candidate, size) <= width_limit || current.is_empty() {
            current = candidate;
        } else {
            lines.push(current);
            current = word.to_string();
            width_limit = rest_width;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Map text to WinAnsi (CP1252) bytes, replacing unmappable glyphs.
fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7E}' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u8,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            '\u{20AC}' => 0x80,
            '\u{2022}' => 0x95,
            _ => b'?',
        })
        .collect()
}

struct BlockStyle {
    face: Face,
    size: f64,
    space_before: f64,
    space_after: f64,
    indent: f64,
    first_indent: f64,
    centered: bool,
}

fn block_style(kind: BlockKind, options: &PdfOptions) -> BlockStyle {
    let body = options.body_size_pt;
    match kind {
        // Emphasis falls with depth: level-1 titles largest.
        BlockKind::Heading(depth) => {
            let size = match depth {
                1 => body * 2.0,
                2 => body * 1.6,
                _ => body * 1.3,
            };
            BlockStyle {
                face: Face::Bold,
                size,
                space_before: size * 1.2,
                space_after: size * 0.8,
                indent: 0.0,
                first_indent: 0.0,
                centered: true,
            }
        }
        BlockKind::Quote => BlockStyle {
            face: Face::Italic,
            size: body,
            space_before: body * 0.6,
            space_after: body * 0.6,
            indent: body * 2.0,
            first_indent: 0.0,
            centered: false,
        },
        BlockKind::ListItem => BlockStyle {
            face: Face::Regular,
            size: body,
            space_before: body * 0.2,
            space_after: body * 0.2,
            indent: body * 1.5,
            first_indent: 0.0,
            centered: false,
        },
        BlockKind::Paragraph | BlockKind::PageBreak => BlockStyle {
            face: Face::Regular,
            size: body,
            space_before: 0.0,
            space_after: body * 0.5,
            indent: 0.0,
            first_indent: body * 1.5,
            centered: false,
        },
    }
}

struct Paginator<'a> {
    options: &'a PdfOptions,
    finished: Vec<Vec<PlacedLine>>,
    current: Vec<PlacedLine>,
    cursor_y: f64,
    fresh_page: bool,
}

impl<'a> Paginator<'a> {
    fn new(options: &'a PdfOptions) -> Self {
        Self {
            options,
            finished: Vec::new(),
            current: Vec::new(),
            cursor_y: options.page.height_pt - options.margin_top_pt,
            fresh_page: true,
        }
    }

    fn break_page(&mut self) {
        if !self.fresh_page {
            self.finished.push(std::mem::take(&mut self.current));
            self.cursor_y = self.options.page.height_pt - self.options.margin_top_pt;
            self.fresh_page = true;
        }
    }

    fn finish(mut self) -> Vec<Vec<PlacedLine>> {
        // A trailing page break must not leave a blank last page.
        if !self.current.is_empty() || self.finished.is_empty() {
            self.finished.push(self.current);
        }
        self.finished
    }

    fn place_block(&mut self, block: &TextBlock) {
        if block.kind == BlockKind::PageBreak {
            self.break_page();
            return;
        }

        let style = block_style(block.kind, self.options);
        let line_height = style.size * self.options.line_factor;
        let column = self.options.column_width();

        let prefix = if block.kind == BlockKind::ListItem {
            "\u{2022} "
        } else {
            ""
        };
        let text = format!("{}{}", prefix, block.text);

        let first_width = column - style.indent - style.first_indent;
        let rest_width = column - style.indent;
        let lines = wrap(&text, style.size, first_width, rest_width);
        if lines.is_empty() {
            return;
        }

        if !self.fresh_page {
            self.cursor_y -= style.space_before;
        }

        for (i, line) in lines.iter().enumerate() {
            if self.cursor_y - line_height < self.options.margin_bottom_pt {
                self.finished.push(std::mem::take(&mut self.current));
                self.cursor_y = self.options.page.height_pt - self.options.margin_top_pt;
            }

            let base_x = self.options.margin_inner_pt + style.indent;
            let x = if style.centered {
                let width = text_width(line, style.size);
                self.options.margin_inner_pt + ((column - width) / 2.0).max(0.0)
            } else if i == 0 {
                base_x + style.first_indent
            } else {
                base_x
            };

            self.cursor_y -= line_height;
            self.current.push(PlacedLine {
                x,
                y: self.cursor_y,
                size: style.size,
                face: style.face,
                text: line.clone(),
            });
            self.fresh_page = false;
        }

        self.cursor_y -= style.space_after;
    }
}

fn text_operations(line: &PlacedLine) -> [Operation; 5] {
    [
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(line.face.resource().into()), line.size.into()],
        ),
        Operation::new("Td", vec![line.x.into(), line.y.into()]),
        Operation::new(
            "Tj",
            vec![Object::String(
                encode_winansi(&line.text),
                StringFormat::Literal,
            )],
        ),
        Operation::new("ET", vec![]),
    ]
}

/// Compose a paginated PDF from a book HTML document.
pub fn compose(html: &str, options: &PdfOptions) -> Result<Vec<u8>> {
    let blocks = extract_blocks(html);

    let mut paginator = Paginator::new(options);
    for block in &blocks {
        paginator.place_block(block);
    }
    let pages = paginator.finish();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Roman",
        "Encoding" => "WinAnsiEncoding",
    });
    let font_bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let font_italic = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Italic",
        "Encoding" => "WinAnsiEncoding",
    });

    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => font_regular,
            "F2" => font_bold,
            "F3" => font_italic,
        },
    };
    let resources_id = doc.add_object(resources);

    let footer_size = 9.0;
    let page_count = pages.len();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);

    for (index, lines) in pages.iter().enumerate() {
        let mut operations: Vec<Operation> = Vec::with_capacity(lines.len() * 5 + 10);

        if let Some(title) = &options.header_title {
            let header = PlacedLine {
                x: 0.0,
                y: options.page.height_pt - options.margin_top_pt / 2.0,
                size: footer_size,
                face: Face::Regular,
                text: title.clone(),
            };
            let width = text_width(&header.text, header.size);
            let centered = PlacedLine {
                x: ((options.page.width_pt - width) / 2.0).max(0.0),
                ..header
            };
            operations.extend(text_operations(&centered));
        }

        for line in lines {
            operations.extend(text_operations(line));
        }

        if options.include_page_numbers {
            let number = (index + 1).to_string();
            let width = text_width(&number, footer_size);
            let footer = PlacedLine {
                x: ((options.page.width_pt - width) / 2.0).max(0.0),
                y: options.margin_bottom_pt / 2.0,
                size: footer_size,
                face: Face::Regular,
                text: number,
            };
            operations.extend(text_operations(&footer));
        }

        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| AppError::Pdf(format!("Content encoding failed: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                options.page.width_pt.into(),
                options.page.height_pt.into(),
            ],
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::string_literal("bookforge"),
    });
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut std::io::Cursor::new(&mut buffer))
        .map_err(|e| AppError::Pdf(format!("Failed to serialize document: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PdfOptions {
        PdfOptions {
            page: PageDimensions {
                width_pt: 432.0,
                height_pt: 648.0,
            },
            margin_top_pt: 54.0,
            margin_bottom_pt: 54.0,
            margin_inner_pt: 70.0,
            margin_outer_pt: 54.0,
            body_size_pt: 11.0,
            line_factor: 1.6,
            include_page_numbers: true,
            header_title: Some("Test".to_string()),
        }
    }

    #[test]
    fn wrap_respects_column_width() {
        let lines = wrap("alpha beta gamma delta epsilon zeta", 11.0, 100.0, 100.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, 11.0) <= 100.0 + 0.001);
        }
    }

    #[test]
    fn wrap_keeps_overlong_word_whole() {
        let lines = wrap("supercalifragilisticexpialidocious", 20.0, 30.0, 30.0);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn winansi_maps_latin_and_replaces_rest() {
        assert_eq!(encode_winansi("Capítulo"), b"Cap\xedtulo".to_vec());
        assert_eq!(encode_winansi("日本"), b"??".to_vec());
        assert_eq!(encode_winansi("\u{2019}"), vec![0x92]);
    }

    #[test]
    fn compose_produces_pdf_header() {
        let pdf = compose("<h1>Title</h1><p>Body text.</p>", &options()).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));
        assert!(pdf.len() > 500);
    }

    #[test]
    fn page_break_marker_starts_new_page() {
        let html = format!(
            "<p>first page</p><hr class=\"{}\" /><p>second page</p>",
            crate::export::markup::PAGE_BREAK_CLASS
        );
        let blocks = extract_blocks(&html);
        let opts = options();
        let mut paginator = Paginator::new(&opts);
        for block in &blocks {
            paginator.place_block(block);
        }
        assert_eq!(paginator.finish().len(), 2);
    }

    #[test]
    fn compose_is_deterministic() {
        let html = "<h2>Uno</h2><p>Texto del capítulo.</p>";
        let a = compose(html, &options()).unwrap();
        let b = compose(html, &options()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_text_flows_over_pages() {
        let paragraph = "palabra ".repeat(400);
        let html = format!("<p>{}</p><p>{}</p><p>{}</p>", paragraph, paragraph, paragraph);
        let blocks = extract_blocks(&html);
        let opts = options();
        let mut paginator = Paginator::new(&opts);
        for block in &blocks {
            paginator.place_block(block);
        }
        let pages = paginator.finish();
        assert!(pages.len() > 1);
        for page in &pages {
            for line in page {
                assert!(line.y >= opts.margin_bottom_pt - 0.001);
                assert!(line.y <= opts.page.height_pt - opts.margin_top_pt);
            }
        }
    }
}
