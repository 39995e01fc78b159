//! Markdown structure parser
//!
//! Header enumeration and chunking are line-based because chunk boundaries
//! and section assignment need exact 0-based line numbers. Link and code
//! block extraction go through the pulldown-cmark event stream.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// An ATX header found in the body. `line` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub level: u8,
    pub text: String,
    pub line: usize,
}

/// An inline markdown link `[text](url)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownLink {
    pub text: String,
    pub url: String,
}

/// A fenced code block. `language` is the info string and may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// A header-delimited body slice. `header_path` is the `" > "`-joined titles
/// of the enclosing header stack; empty for pre-header content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub start_line: usize,
    pub header_path: String,
}

/// Strip an optional leading `---`-delimited YAML frontmatter block.
///
/// Returns the body and the parsed frontmatter. A block whose YAML does not
/// parse is still stripped; its value is reported as `None`.
pub fn split_frontmatter(content: &str) -> (&str, Option<serde_json::Value>) {
    let Some(rest) = content.strip_prefix("---") else {
        return (content, None);
    };
    let Some(end) = rest.find("\n---") else {
        return (content, None);
    };
    let frontmatter_str = &rest[..end];
    let after = &rest[end + 4..];
    // The closing delimiter line may carry a trailing newline.
    let body = after.strip_prefix('\n').unwrap_or(after);

    let frontmatter = serde_yaml::from_str::<serde_yaml::Value>(frontmatter_str)
        .ok()
        .and_then(|yaml| serde_json::to_value(yaml).ok());

    (body, frontmatter)
}

/// Enumerate ATX headers (`#` through `######` at column 0, followed by a
/// space). Lines inside fenced code blocks are skipped.
pub fn extract_headers(body: &str) -> Vec<Header> {
    let mut headers = Vec::new();
    let mut in_fence = false;

    for (line_no, line) in body.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || !line.starts_with('#') {
            continue;
        }
        let level = line.chars().take_while(|&c| c == '#').count();
        if level > 6 {
            continue;
        }
        let rest = &line[level..];
        if !rest.starts_with(' ') {
            continue;
        }
        headers.push(Header {
            level: level as u8,
            text: rest.trim().to_string(),
            line: line_no,
        });
    }

    headers
}

/// Extract inline markdown links in document order.
pub fn extract_links(body: &str) -> Vec<MarkdownLink> {
    let parser = Parser::new_ext(body, Options::empty());
    let mut links = Vec::new();
    let mut current: Option<MarkdownLink> = None;

    for event in parser {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) => {
                current = Some(MarkdownLink {
                    text: String::new(),
                    url: dest_url.to_string(),
                });
            }
            Event::End(TagEnd::Link) => {
                if let Some(link) = current.take() {
                    links.push(link);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(link) = current.as_mut() {
                    link.text.push_str(&text);
                }
            }
            _ => {}
        }
    }

    links
}

/// Extract fenced code blocks in document order. Indented blocks are ignored.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let parser = Parser::new_ext(text, Options::empty());
    let mut blocks = Vec::new();
    let mut fenced_language: Option<String> = None;
    let mut code = String::new();

    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                fenced_language = Some(lang.to_string());
                code.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(language) = fenced_language.take() {
                    blocks.push(CodeBlock {
                        language,
                        code: code.trim_end_matches('\n').to_string(),
                    });
                }
                code.clear();
            }
            Event::Text(text) => {
                if fenced_language.is_some() {
                    code.push_str(&text);
                }
            }
            _ => {}
        }
    }

    blocks
}

/// Split the body into chunks at every header.
///
/// Each header starts a new chunk containing the header line and everything
/// up to the next header. Non-whitespace content before the first header
/// becomes its own chunk with an empty `header_path`. A body with no headers
/// yields a single chunk. Indices are dense from 0 in document order.
pub fn chunk_by_headers(body: &str) -> Vec<Chunk> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let headers = extract_headers(body);
    let lines: Vec<&str> = body.lines().collect();

    // Segment starts: an optional leading segment, then one per header.
    let mut starts: Vec<(usize, Option<usize>)> = Vec::new();
    if headers.first().map_or(true, |h| h.line > 0) {
        starts.push((0, None));
    }
    for (i, h) in headers.iter().enumerate() {
        starts.push((h.line, Some(i)));
    }

    let mut chunks = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();

    for (pos, (start, header_idx)) in starts.iter().enumerate() {
        let end = starts
            .get(pos + 1)
            .map(|(line, _)| *line)
            .unwrap_or(lines.len());
        let content = lines[*start..end].join("\n");

        let header_path = match header_idx {
            None => {
                if content.trim().is_empty() {
                    continue;
                }
                String::new()
            }
            Some(i) => {
                let header = &headers[*i];
                while stack.last().map_or(false, |(level, _)| *level >= header.level) {
                    stack.pop();
                }
                stack.push((header.level, header.text.clone()));
                stack
                    .iter()
                    .map(|(_, title)| title.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ")
            }
        };

        chunks.push(Chunk {
            index: chunks.len(),
            content,
            start_line: *start,
            header_path,
        });
    }

    chunks
}
