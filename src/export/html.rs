//! Book HTML assembly.
//!
//! The export pipeline first renders the project's chapter tree into one
//! HTML document with a generated stylesheet, then hands that document to
//! the PDF composer. Render sequence: front matter, generated TOC, main
//! matter (parts, chapters and subchapters inline in order), back matter.

use crate::db::{Chapter, Project};
use crate::export::markup::{PAGE_BREAK_CLASS, xml_escape};

/// Physical page dimensions in PostScript points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    /// Page width in points.
    pub width_pt: f64,
    /// Page height in points.
    pub height_pt: f64,
}

/// Millimeters to points (1 in = 25.4 mm = 72 pt).
pub fn mm_to_pt(mm: f64) -> f64 {
    mm * 72.0 / 25.4
}

/// Resolve the project's page geometry from the closed named-size set,
/// falling back to 6"x9" trade format. "custom" uses the stored mm sizes.
pub fn page_dimensions(project: &Project) -> PageDimensions {
    match project.page_size.as_str() {
        "6x9" => PageDimensions {
            width_pt: 432.0,
            height_pt: 648.0,
        },
        "5.5x8.5" => PageDimensions {
            width_pt: 396.0,
            height_pt: 612.0,
        },
        "8.5x11" | "Letter" => PageDimensions {
            width_pt: 612.0,
            height_pt: 792.0,
        },
        "A4" => PageDimensions {
            width_pt: mm_to_pt(210.0),
            height_pt: mm_to_pt(297.0),
        },
        "A5" => PageDimensions {
            width_pt: mm_to_pt(148.0),
            height_pt: mm_to_pt(210.0),
        },
        "custom" => match (project.custom_width_mm, project.custom_height_mm) {
            (Some(w), Some(h)) if w > 0 && h > 0 => PageDimensions {
                width_pt: mm_to_pt(w as f64),
                height_pt: mm_to_pt(h as f64),
            },
            _ => PageDimensions {
                width_pt: 432.0,
                height_pt: 648.0,
            },
        },
        _ => PageDimensions {
            width_pt: 432.0,
            height_pt: 648.0,
        },
    }
}

/// Split the ordered chapter list into the three render groups. Parts and
/// subchapters stay inline in the main stream; the kind tag only affects
/// numbering and TOC filtering there.
pub fn partition(chapters: &[Chapter]) -> (Vec<&Chapter>, Vec<&Chapter>, Vec<&Chapter>) {
    let mut front = Vec::new();
    let mut main = Vec::new();
    let mut back = Vec::new();

    for chapter in chapters {
        if chapter.kind.is_main_matter() {
            main.push(chapter);
        } else if chapter.kind == crate::db::ChapterKind::Frontmatter {
            front.push(chapter);
        } else {
            back.push(chapter);
        }
    }

    (front, main, back)
}

/// TOC entries: main-matter chapters flagged for inclusion, in render
/// order, paired with a 1-based sequence number. Page numbers are not
/// computed; flowed HTML conversion cannot know them ahead of pagination.
pub fn toc_entries<'a>(main: &[&'a Chapter]) -> Vec<(usize, &'a Chapter)> {
    main.iter()
        .filter(|c| c.include_in_toc)
        .enumerate()
        .map(|(i, c)| (i + 1, *c))
        .collect()
}

fn chapter_section(chapter: &Chapter) -> String {
    let break_marker = if chapter.start_on_new_page {
        format!("<hr class=\"{}\" />\n", PAGE_BREAK_CLASS)
    } else {
        String::new()
    };

    // Title depth follows the chapter level: parts largest, subchapters smallest.
    let heading = match chapter.level {
        1 => "h1",
        2 => "h2",
        _ => "h3",
    };

    format!(
        "{}<section class=\"chapter level-{}\">\n<{} class=\"chapter-title\">{}</{}>\n<div class=\"chapter-content\">\n{}\n</div>\n</section>\n",
        break_marker,
        chapter.level,
        heading,
        xml_escape(&chapter.title),
        heading,
        chapter.content,
    )
}

fn toc_section(main: &[&Chapter]) -> String {
    let entries = toc_entries(main);
    if entries.is_empty() {
        return String::new();
    }

    let items = entries
        .iter()
        .map(|(number, chapter)| {
            format!(
                "<p class=\"toc-item\">{}. {}</p>",
                number,
                xml_escape(&chapter.title)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<hr class=\"{}\" />\n<section class=\"toc\">\n<h1 class=\"toc-heading\">Tabla de Contenidos</h1>\n{}\n</section>\n",
        PAGE_BREAK_CLASS, items
    )
}

/// Generated stylesheet from the project's typography settings.
pub fn stylesheet(project: &Project) -> String {
    let font_size = project.font_size_pt;
    let line_height = project.line_height_percent as f64 / 100.0;

    format!(
        r#"body {{
  font-family: {font}, serif;
  font-size: {font_size}pt;
  line-height: {line_height};
  color: #000;
  background: #fff;
}}
.chapter-title {{
  font-weight: bold;
  text-align: center;
  page-break-after: avoid;
}}
.chapter-content p {{
  margin: 0 0 1em 0;
  text-align: justify;
  text-indent: 1.5em;
  orphans: 2;
  widows: 2;
}}
.chapter-content p:first-of-type {{
  text-indent: 0;
}}
.chapter-content img {{
  max-width: 100%;
  height: auto;
  display: block;
  margin: 1em auto;
  page-break-inside: avoid;
}}
.chapter-content blockquote {{
  margin: 1em 2em;
  padding: 0.5em 1em;
  border-left: 3px solid #ccc;
  font-style: italic;
}}
.toc-item {{
  margin: 0.5em 0;
  page-break-inside: avoid;
}}
"#,
        font = project.font_family,
        font_size = font_size,
        line_height = line_height,
    )
}

/// Assemble the complete book document. `chapters` must already be sorted
/// ascending by order index.
pub fn book_html(project: &Project, chapters: &[Chapter], include_toc: bool) -> String {
    let (front, main, back) = partition(chapters);

    let front_html: String = front.iter().map(|c| chapter_section(c)).collect();
    let toc_html = if include_toc {
        toc_section(&main)
    } else {
        String::new()
    };
    let main_html: String = main.iter().map(|c| chapter_section(c)).collect();
    let back_html: String = back.iter().map(|c| chapter_section(c)).collect();

    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\" />\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n<div class=\"book\">\n{}{}{}{}</div>\n</body>\n</html>\n",
        xml_escape(&project.title),
        stylesheet(project),
        front_html,
        toc_html,
        main_html,
        back_html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ChapterKind, now_timestamp};

    fn test_project() -> Project {
        Project {
            id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            title: "Test Book".to_string(),
            subtitle: None,
            author: Some("Author".to_string()),
            genre: None,
            status: crate::db::ProjectStatus::Draft,
            page_size: "6x9".to_string(),
            custom_width_mm: None,
            custom_height_mm: None,
            margin_top_mm: 19,
            margin_bottom_mm: 19,
            margin_left_mm: 19,
            margin_right_mm: 19,
            margin_gutter_mm: 6,
            font_family: "Georgia".to_string(),
            font_size_pt: 11,
            line_height_percent: 160,
            cover_image_path: None,
            cover_title_x: None,
            cover_title_y: None,
            cover_author_x: None,
            cover_author_y: None,
            cover_title_size_pt: 48,
            cover_author_size_pt: 24,
            cover_title_color: "#FFFFFF".to_string(),
            cover_author_color: "#FFFFFF".to_string(),
            biography: None,
            dedication: None,
            acknowledgments: None,
            copyright: None,
            isbn: None,
            publisher: None,
            auto_number_chapters: true,
            chapter_number_format: "Capítulo {n}".to_string(),
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        }
    }

    fn test_chapter(title: &str, kind: ChapterKind, order: i64, in_toc: bool) -> Chapter {
        Chapter {
            id: format!("c-{}", order),
            project_id: "p-1".to_string(),
            parent_id: None,
            title: title.to_string(),
            content: format!("<p>{} body</p>", title),
            kind,
            level: kind.level(),
            order_index: order,
            start_on_new_page: true,
            include_in_toc: in_toc,
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        }
    }

    #[test]
    fn named_sizes_resolve() {
        let mut project = test_project();
        assert_eq!(page_dimensions(&project).width_pt, 432.0);

        project.page_size = "A4".to_string();
        let dims = page_dimensions(&project);
        assert!((dims.width_pt - 595.27).abs() < 0.1);
        assert!((dims.height_pt - 841.89).abs() < 0.1);

        project.page_size = "custom".to_string();
        project.custom_width_mm = Some(100);
        project.custom_height_mm = Some(200);
        let dims = page_dimensions(&project);
        assert!((dims.width_pt - mm_to_pt(100.0)).abs() < 0.001);
    }

    #[test]
    fn unknown_size_falls_back_to_trade() {
        let mut project = test_project();
        project.page_size = "folio".to_string();
        assert_eq!(page_dimensions(&project).width_pt, 432.0);
    }

    #[test]
    fn render_sequence_brackets_main_matter() {
        let project = test_project();
        let chapters = vec![
            test_chapter("Dedication", ChapterKind::Frontmatter, 0, false),
            test_chapter("Introduction", ChapterKind::Chapter, 1, true),
            test_chapter("Conclusion", ChapterKind::Chapter, 2, true),
            test_chapter("Bibliography", ChapterKind::Backmatter, 3, false),
        ];

        let html = book_html(&project, &chapters, true);

        let dedication = html.find("Dedication").unwrap();
        let toc = html.find("Tabla de Contenidos").unwrap();
        let intro = html.rfind("Introduction body").unwrap();
        let conclusion = html.rfind("Conclusion body").unwrap();
        let bibliography = html.find("Bibliography").unwrap();

        assert!(dedication < toc);
        assert!(toc < intro);
        assert!(intro < conclusion);
        assert!(conclusion < bibliography);
    }

    #[test]
    fn toc_lists_only_flagged_main_matter() {
        let chapters = vec![
            test_chapter("Dedication", ChapterKind::Frontmatter, 0, true),
            test_chapter("Introduction", ChapterKind::Chapter, 1, true),
            test_chapter("Secret", ChapterKind::Chapter, 2, false),
            test_chapter("Conclusion", ChapterKind::Chapter, 3, true),
        ];
        let (_, main, _) = partition(&chapters);

        let entries = toc_entries(&main);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 1);
        assert_eq!(entries[0].1.title, "Introduction");
        assert_eq!(entries[1].0, 2);
        assert_eq!(entries[1].1.title, "Conclusion");
    }

    #[test]
    fn parts_stay_inline_in_main_stream() {
        let chapters = vec![
            test_chapter("PARTE I", ChapterKind::Part, 0, true),
            test_chapter("Uno", ChapterKind::Chapter, 1, true),
            test_chapter("1.1", ChapterKind::Subchapter, 2, false),
        ];
        let (front, main, back) = partition(&chapters);
        assert!(front.is_empty());
        assert!(back.is_empty());
        assert_eq!(main.len(), 3);
        assert_eq!(main[0].title, "PARTE I");
    }
}
