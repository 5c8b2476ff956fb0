//! Reflowable EPUB packaging.
//!
//! Produces an EPUB 3 container: `mimetype` first and uncompressed, then
//! the OPF package, navigation documents (nav.xhtml + legacy toc.ncx),
//! stylesheet, one XHTML document per chapter, and the cover resource when
//! the project has one. Front-matter chapters are placed in the spine
//! before the visible TOC page; `include_in_toc` filters the navigation
//! documents. Chapter bodies pass through the EPUB sanitizer first:
//! readers honor inline styles inconsistently and require image alt text.

use crate::db::{Chapter, Project};
use crate::error::{AppError, Result};
use crate::export::html::partition;
use crate::export::markup::{sanitize_for_epub, xml_escape};
use std::io::{Cursor, Write as _};
use zip::write::SimpleFileOptions;

struct SpineItem<'a> {
    file: String,
    chapter: &'a Chapter,
}

fn cover_media(cover: &[u8]) -> Result<(Vec<u8>, &'static str, &'static str)> {
    // Keep PNG and JPEG as-is, transcode anything else to PNG.
    if cover.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok((cover.to_vec(), "cover.png", "image/png"));
    }
    if cover.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok((cover.to_vec(), "cover.jpg", "image/jpeg"));
    }

    let img = image::load_from_memory(cover)
        .map_err(|e| AppError::ExternalService(format!("Unreadable cover image: {}", e)))?;
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| AppError::ExternalService(format!("Cover conversion failed: {}", e)))?;
    Ok((png, "cover.png", "image/png"))
}

fn chapter_xhtml(chapter: &Chapter, lang: &str) -> String {
    let body = sanitize_for_epub(&chapter.content);
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{lang}\" xml:lang=\"{lang}\">\n<head>\n  <title>{title}</title>\n  <meta charset=\"utf-8\" />\n  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n</head>\n<body>\n<h1 class=\"chapter-title\">{title}</h1>\n{body}\n</body>\n</html>\n",
        lang = xml_escape(lang),
        title = xml_escape(&chapter.title),
        body = body,
    )
}

fn container_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
}

fn stylesheet(project: &Project) -> String {
    format!(
        r#"@charset "utf-8";

body {{
  font-family: {font}, serif;
  font-size: {size}pt;
  line-height: {line_height};
  margin: 1em;
  text-align: justify;
}}
h1, h2, h3 {{ font-weight: bold; page-break-after: avoid; }}
h1 {{ font-size: 2em; text-align: center; }}
h2 {{ font-size: 1.5em; }}
h3 {{ font-size: 1.2em; }}
p {{ margin: 0 0 1em 0; text-indent: 1.5em; orphans: 2; widows: 2; }}
p:first-of-type, h1 + p, h2 + p, h3 + p {{ text-indent: 0; }}
img {{ max-width: 100%; height: auto; display: block; margin: 1em auto; }}
blockquote {{ margin: 1em 2em; padding: 0.5em 1em; border-left: 3px solid #ccc; font-style: italic; }}
"#,
        font = project.font_family,
        size = project.font_size_pt,
        line_height = project.line_height_percent as f64 / 100.0,
    )
}

fn nav_xhtml(project: &Project, lang: &str, toc: &[&SpineItem<'_>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n",
        lang = xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(&project.title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n<body>\n");
    out.push_str("  <h1>Tabla de Contenidos</h1>\n");
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n    <ol>\n");
    for item in toc {
        out.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&item.file),
            xml_escape(&item.chapter.title)
        ));
    }
    out.push_str("    </ol>\n  </nav>\n</body>\n</html>\n");
    out
}

fn toc_ncx(project: &Project, toc: &[&SpineItem<'_>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{}\" />\n",
        xml_escape(&project.id)
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(&project.title));
    out.push_str("</text></docTitle>\n  <navMap>\n");
    for (idx, item) in toc.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&item.chapter.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!("      <content src=\"{}\" />\n", xml_escape(&item.file)));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n</ncx>\n");
    out
}

fn content_opf(
    project: &Project,
    lang: &str,
    spine: &[SpineItem<'_>],
    front_count: usize,
    cover_file: Option<(&str, &str)>,
) -> String {
    let author = project.author.clone().unwrap_or_else(|| "Autor desconocido".to_string());
    let publisher = project
        .publisher
        .clone()
        .unwrap_or_else(|| "bookforge".to_string());
    let modified = crate::db::timestamp_to_datetime(project.updated_at)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{}</dc:identifier>\n",
        xml_escape(&project.id)
    ));
    out.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(&project.title)));
    out.push_str(&format!("    <dc:creator>{}</dc:creator>\n", xml_escape(&author)));
    out.push_str(&format!("    <dc:language>{}</dc:language>\n", xml_escape(lang)));
    out.push_str(&format!(
        "    <dc:publisher>{}</dc:publisher>\n",
        xml_escape(&publisher)
    ));
    if let Some(isbn) = &project.isbn {
        out.push_str(&format!(
            "    <dc:identifier>urn:isbn:{}</dc:identifier>\n",
            xml_escape(isbn)
        ));
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(&modified)
    ));
    if cover_file.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str("  </metadata>\n  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    if let Some((file, media)) = cover_file {
        out.push_str(&format!(
            "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\" />\n",
            xml_escape(file),
            media
        ));
    }
    for (idx, item) in spine.iter().enumerate() {
        out.push_str(&format!(
            "    <item id=\"ch{}\" href=\"{}\" media-type=\"application/xhtml+xml\" />\n",
            idx,
            xml_escape(&item.file)
        ));
    }
    out.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    // Front matter reads before the TOC page, everything else after.
    for idx in 0..front_count {
        out.push_str(&format!("    <itemref idref=\"ch{}\" />\n", idx));
    }
    out.push_str("    <itemref idref=\"nav\" />\n");
    for idx in front_count..spine.len() {
        out.push_str(&format!("    <itemref idref=\"ch{}\" />\n", idx));
    }
    out.push_str("  </spine>\n</package>\n");
    out
}

/// Package a project's ordered chapters into an EPUB binary.
///
/// `cover` carries the raw uploaded cover image when the project has one.
/// A packaging failure surfaces as an error, never a truncated artifact.
pub fn package(project: &Project, chapters: &[Chapter], cover: Option<&[u8]>) -> Result<Vec<u8>> {
    let lang = "es";
    let (front, main, back) = partition(chapters);
    let front_count = front.len();

    let ordered: Vec<&Chapter> = front.into_iter().chain(main).chain(back).collect();
    let spine: Vec<SpineItem<'_>> = ordered
        .iter()
        .enumerate()
        .map(|(idx, chapter)| SpineItem {
            file: format!("ch{:03}.xhtml", idx),
            chapter,
        })
        .collect();

    let toc: Vec<&SpineItem<'_>> = spine.iter().filter(|i| i.chapter.include_in_toc).collect();

    let cover_data = cover.map(cover_media).transpose()?;
    let cover_file = cover_data
        .as_ref()
        .map(|(_, file, media)| (*file, *media));

    let container = container_xml();
    let css = stylesheet(project);
    let nav = nav_xhtml(project, lang, &toc);
    let ncx = toc_ncx(project, &toc);
    let opf = content_opf(project, lang, &spine, front_count, cover_file);

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));

    // Per the EPUB spec, `mimetype` must be the first entry and stored
    // without compression.
    let stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    let deflated = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(container.as_bytes())?;

    zip.start_file("OEBPS/content.opf", deflated)?;
    zip.write_all(opf.as_bytes())?;

    zip.start_file("OEBPS/nav.xhtml", deflated)?;
    zip.write_all(nav.as_bytes())?;

    zip.start_file("OEBPS/toc.ncx", deflated)?;
    zip.write_all(ncx.as_bytes())?;

    zip.start_file("OEBPS/style.css", deflated)?;
    zip.write_all(css.as_bytes())?;

    if let Some((bytes, file, _)) = &cover_data {
        zip.start_file(format!("OEBPS/{}", file), deflated)?;
        zip.write_all(bytes)?;
    }

    for item in &spine {
        zip.start_file(format!("OEBPS/{}", item.file), deflated)?;
        zip.write_all(chapter_xhtml(item.chapter, lang).as_bytes())?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}
