//! Small HTML utilities shared by the PDF and EPUB backends.
//!
//! Chapter bodies are author-supplied HTML. Nothing here tries to be a
//! full parser; a quote-aware tag scanner is enough for block extraction
//! and for the attribute rewriting EPUB readers require, and malformed
//! input degrades to text instead of failing the export.

/// Block-level role of an extracted text run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Heading with depth 1-6.
    Heading(u8),
    /// Regular paragraph.
    Paragraph,
    /// Block quote content.
    Quote,
    /// List item.
    ListItem,
    /// Forced page break (from a break marker element).
    PageBreak,
}

/// One block of flowed text.
#[derive(Debug, Clone)]
pub struct TextBlock {
    /// Block role.
    pub kind: BlockKind,
    /// Whitespace-normalized text content.
    pub text: String,
}

/// CSS class marking a forced page break in generated book HTML.
pub const PAGE_BREAK_CLASS: &str = "page-break";

fn is_void_tag(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Scan to the end of the tag starting at `lt`, respecting quoted
/// attribute values. Returns the index of the closing `>` or None when
/// the tag never closes.
fn find_tag_end(bytes: &[u8], lt: usize) -> Option<usize> {
    let mut in_quote: Option<u8> = None;
    let mut i = lt + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_quote {
            if b == q {
                in_quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            in_quote = Some(b);
        } else if b == b'>' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn tag_name(tag_body: &str) -> String {
    tag_body
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Decode the handful of entities that show up in editor output.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let Some(semi) = rest[..rest.len().min(12)].find(';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };

        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity.strip_prefix('#').and_then(|num| {
                let code = if let Some(hex) = num.strip_prefix('x').or(num.strip_prefix('X')) {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    num.parse().ok()
                };
                code.and_then(char::from_u32)
            }),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Escape text for XML/XHTML output.
pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn push_block(blocks: &mut Vec<TextBlock>, kind: BlockKind, buffer: &mut String) {
    let text = decode_entities(buffer)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    buffer.clear();
    if !text.is_empty() {
        blocks.push(TextBlock { kind, text });
    }
}

/// Reduce an HTML fragment (or document) to a flat block stream.
///
/// Unknown and inline tags are transparent; unclosed blocks flush at end
/// of input. `<hr class="page-break">` becomes a PageBreak block.
pub fn extract_blocks(html: &str) -> Vec<TextBlock> {
    let bytes = html.as_bytes();
    let mut blocks = Vec::new();
    let mut buffer = String::new();
    // Innermost open block element decides the kind of flushed text.
    let mut kind_stack: Vec<BlockKind> = Vec::new();
    let mut in_skipped = 0usize; // depth inside <style>/<script>/<head>
    let mut cursor = 0;

    let current_kind =
        |stack: &Vec<BlockKind>| -> BlockKind { *stack.last().unwrap_or(&BlockKind::Paragraph) };

    while let Some(rel) = html[cursor..].find('<') {
        let lt = cursor + rel;
        if in_skipped == 0 {
            buffer.push_str(&html[cursor..lt]);
        }

        let Some(gt) = find_tag_end(bytes, lt) else {
            // Malformed tail; treat the rest as text.
            if in_skipped == 0 {
                buffer.push_str(&html[lt..]);
            }
            cursor = html.len();
            break;
        };

        let body = &html[lt + 1..gt];
        cursor = gt + 1;

        if body.starts_with('!') || body.starts_with('?') {
            continue;
        }

        let closing = body.starts_with('/');
        let name = tag_name(body);

        match name.as_str() {
            "style" | "script" | "head" | "title" => {
                if closing {
                    in_skipped = in_skipped.saturating_sub(1);
                } else {
                    in_skipped += 1;
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let depth = name.as_bytes()[1] - b'0';
                if closing {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.pop();
                } else {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.push(BlockKind::Heading(depth));
                }
            }
            "p" | "div" | "section" | "article" => {
                if closing {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.pop();
                } else {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    // A paragraph inside a quote renders as quote text.
                    let kind = if kind_stack.contains(&BlockKind::Quote) {
                        BlockKind::Quote
                    } else {
                        BlockKind::Paragraph
                    };
                    kind_stack.push(kind);
                }
            }
            "blockquote" => {
                if closing {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.pop();
                } else {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.push(BlockKind::Quote);
                }
            }
            "li" => {
                if closing {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.pop();
                } else {
                    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                    kind_stack.push(BlockKind::ListItem);
                }
            }
            "hr" => {
                push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);
                if body.contains(PAGE_BREAK_CLASS) {
                    blocks.push(TextBlock {
                        kind: BlockKind::PageBreak,
                        text: String::new(),
                    });
                }
            }
            "br" => buffer.push(' '),
            _ => {} // inline or unknown: text flows through
        }
    }

    if cursor < html.len() && in_skipped == 0 {
        buffer.push_str(&html[cursor..]);
    }
    push_block(&mut blocks, current_kind(&kind_stack), &mut buffer);

    blocks
}

/// Rewrite one start tag for EPUB output: drop inline `style` attributes,
/// guarantee an `alt` on images, self-close void tags.
fn rewrite_start_tag(body: &str) -> String {
    let name = tag_name(body);
    let mut out = String::with_capacity(body.len() + 16);
    out.push('<');
    out.push_str(&name);

    // Walk attributes, respecting quotes.
    let rest = &body[name.len()..];
    let bytes = rest.as_bytes();
    let mut i = 0;
    let mut has_alt = false;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] as char).is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'/' {
            break;
        }

        let attr_start = i;
        while i < bytes.len()
            && bytes[i] != b'='
            && bytes[i] != b'/'
            && !(bytes[i] as char).is_ascii_whitespace()
        {
            i += 1;
        }
        let attr_name = rest[attr_start..i].to_ascii_lowercase();

        let mut attr_end = i;
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
            } else {
                while i < bytes.len() && !(bytes[i] as char).is_ascii_whitespace() {
                    i += 1;
                }
            }
            attr_end = i;
        }

        if attr_name == "style" {
            continue; // readers honor inline styles inconsistently
        }
        if attr_name == "alt" {
            has_alt = true;
        }
        out.push(' ');
        out.push_str(rest[attr_start..attr_end].trim_end_matches('/').trim_end());
    }

    if name == "img" && !has_alt {
        out.push_str(" alt=\"Imagen\"");
    }

    if is_void_tag(&name) {
        out.push_str(" />");
    } else {
        out.push('>');
    }
    out
}

/// Sanitize an HTML fragment for EPUB packaging: strip inline styles,
/// inject missing image alt text, self-close void tags. Comments,
/// doctypes and end tags pass through untouched.
pub fn sanitize_for_epub(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel) = html[cursor..].find('<') {
        let lt = cursor + rel;
        out.push_str(&html[cursor..lt]);

        let Some(gt) = find_tag_end(bytes, lt) else {
            out.push_str(&html[lt..]);
            return out;
        };

        let body = &html[lt + 1..gt];
        if body.starts_with('!') || body.starts_with('?') || body.starts_with('/') {
            out.push_str(&html[lt..=gt]);
        } else {
            out.push_str(&rewrite_start_tag(body.trim_end()));
        }
        cursor = gt + 1;
    }

    out.push_str(&html[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_headings_and_paragraphs() {
        let html = "<h2>Intro</h2><p>First &amp; second.</p><p>Third</p>";
        let blocks = extract_blocks(html);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].kind, BlockKind::Heading(2));
        assert_eq!(blocks[0].text, "Intro");
        assert_eq!(blocks[1].text, "First & second.");
        assert_eq!(blocks[2].kind, BlockKind::Paragraph);
    }

    #[test]
    fn inline_tags_flow_through() {
        let blocks = extract_blocks("<p>one <b>two</b> <i>three</i></p>");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "one two three");
    }

    #[test]
    fn quote_paragraphs_keep_quote_kind() {
        let blocks = extract_blocks("<blockquote><p>wisdom</p></blockquote>");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Quote);
    }

    #[test]
    fn page_break_markers_survive() {
        let blocks = extract_blocks(&format!("<p>a</p><hr class=\"{}\" /><p>b</p>", PAGE_BREAK_CLASS));
        assert_eq!(blocks[1].kind, BlockKind::PageBreak);
    }

    #[test]
    fn malformed_html_degrades_to_text() {
        let blocks = extract_blocks("<p>open <unclosed");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "open <unclosed");
    }

    #[test]
    fn sanitize_strips_styles_and_injects_alt() {
        let html = r#"<p style="color:red">text</p><img src="x.png">"#;
        let out = sanitize_for_epub(html);
        assert!(!out.contains("style="));
        assert!(out.contains(r#"<img src="x.png" alt="Imagen" />"#));
    }

    #[test]
    fn sanitize_keeps_existing_alt() {
        let out = sanitize_for_epub(r#"<img src="x.png" alt="portrait">"#);
        assert!(out.contains(r#"alt="portrait""#));
        assert!(!out.contains("Imagen"));
    }

    #[test]
    fn entity_decoding_handles_numeric_forms() {
        assert_eq!(decode_entities("a&#233;b"), "aéb");
        assert_eq!(decode_entities("x&#x41;y"), "xAy");
        assert_eq!(decode_entities("&notreal; stays"), "&notreal; stays");
    }
}
