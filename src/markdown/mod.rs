//! Markdown parsing and link resolution.
//!
//! `parser` splits frontmatter from the body, enumerates headers, links and
//! fenced code blocks, and chunks the body at header boundaries. `links`
//! resolves relative document links with pure string math.

pub mod links;
pub mod parser;

pub use links::resolve_relative;
pub use parser::{
    chunk_by_headers, extract_code_blocks, extract_headers, extract_links, split_frontmatter,
    Chunk, CodeBlock, Header, MarkdownLink,
};
