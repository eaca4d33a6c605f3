use super::CodeChunk;
use super::ast_parser::{AstParser, NodeRole};
use super::language::detect_language_for;
use crate::cache::content_hash;
use crate::config::IndexingConfig;
use regex::Regex;
use std::sync::LazyLock;

static MARKDOWN_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}#{1,6}[ \t]+(.+?)[ \t#]*$").expect("heading pattern is valid")
});

/// A byte range of the file that becomes one or more chunks
#[derive(Debug, Clone, PartialEq)]
struct Block {
    start: usize,
    end: usize,
    name: Option<String>,
}

/// Byte offsets of every newline, used to turn offsets into 1-based lines
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        Self {
            newlines: content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i)
                .collect(),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < offset) + 1
    }
}

/// Splits file content into chunks along declaration boundaries
///
/// Sizes are measured in UTF-8 bytes and every cut lands on a character boundary.
#[derive(Debug, Clone)]
pub struct CodeChunker {
    max_chunk_size: usize,
    overlap: usize,
}

impl CodeChunker {
    pub fn new(max_chunk_size: usize, overlap: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1);
        Self {
            max_chunk_size,
            overlap: overlap.min(max_chunk_size - 1),
        }
    }

    pub fn from_config(config: &IndexingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Chunk a file into an ordered list of chunks
    ///
    /// Deterministic for identical input. Files without a grammar, and files the grammar
    /// cannot split, fall back to the sliding window.
    pub fn chunk(&self, content: &str, file_path: &str) -> Vec<CodeChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let language = detect_language_for(file_path, content);
        let blocks = if language == "Markdown" {
            markdown_blocks(content)
        } else if AstParser::supports(&language) {
            structural_blocks(content, &language)
        } else {
            Vec::new()
        };
        let blocks = if blocks.is_empty() {
            vec![Block {
                start: 0,
                end: content.len(),
                name: None,
            }]
        } else {
            blocks
        };

        let lines = LineIndex::new(content);
        let mut chunks = Vec::new();
        for block in blocks {
            for (start, end) in self.windows(content, block.start, block.end) {
                if let Some(chunk) =
                    make_chunk(content, &lines, start, end, file_path, &language, &block.name)
                {
                    chunks.push(chunk);
                }
            }
        }
        chunks
    }

    /// Split `[start, end)` into windows no larger than the maximum chunk size
    ///
    /// Cuts prefer the last newline in the second half of a window. Consecutive windows share
    /// up to `overlap` bytes.
    fn windows(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut windows = Vec::new();
        let mut pos = start;
        while end - pos > self.max_chunk_size {
            let mut cut = floor_boundary(content, pos + self.max_chunk_size);
            if let Some(nl) = content[pos..cut].rfind('\n')
                && nl + 1 > self.max_chunk_size / 2
            {
                cut = pos + nl + 1;
            }
            if cut <= pos {
                // A single character wider than the window
                cut = ceil_boundary(content, pos + 1);
            }
            windows.push((pos, cut));

            let mut next = ceil_boundary(content, cut.saturating_sub(self.overlap).max(pos + 1));
            // Start the overlap on a line boundary when one is available
            if let Some(nl) = content[next..cut].find('\n')
                && next + nl + 1 < cut
            {
                next += nl + 1;
            }
            pos = next;
        }
        if pos < end {
            windows.push((pos, end));
        }
        windows
    }
}

impl Default for CodeChunker {
    fn default() -> Self {
        Self::from_config(&IndexingConfig::default())
    }
}

fn floor_boundary(content: &str, mut index: usize) -> usize {
    index = index.min(content.len());
    while !content.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(content: &str, mut index: usize) -> usize {
    index = index.min(content.len());
    while !content.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Trim blank lines around `[start, end)` and build the chunk, `None` when only whitespace
fn make_chunk(
    content: &str,
    lines: &LineIndex,
    start: usize,
    end: usize,
    file_path: &str,
    language: &str,
    name: &Option<String>,
) -> Option<CodeChunk> {
    let slice = &content[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }

    let first = start + (slice.len() - slice.trim_start().len());
    // Keep the indentation of the first line
    let line_start = content[start..first]
        .rfind('\n')
        .map(|nl| start + nl + 1)
        .unwrap_or(start);
    let last = start + slice.trim_end().len();
    let text = &content[line_start..last];

    Some(CodeChunk {
        file_path: file_path.to_string(),
        start_line: lines.line_of(line_start),
        end_line: lines.line_of(last - 1),
        content: text.to_string(),
        language: language.to_string(),
        function_name: name.clone(),
        content_hash: content_hash(text),
    })
}

/// Group top-level AST nodes into blocks
///
/// Each declaration is its own block and takes the comments and attributes directly above it.
/// Runs of other statements are grouped together. Comments after the last node join the
/// last block.
fn structural_blocks(content: &str, language: &str) -> Vec<Block> {
    let nodes = match AstParser::new(language).and_then(|mut parser| parser.parse(content)) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::debug!("Structural split unavailable for {}: {}", language, e);
            return Vec::new();
        }
    };

    let mut blocks = Vec::new();
    let mut leading: Option<(usize, usize)> = None;
    let mut group: Option<Block> = None;

    for node in nodes {
        match node.role {
            NodeRole::Leading => {
                let range = leading.get_or_insert((node.start_byte, node.end_byte));
                range.1 = node.end_byte;
            }
            NodeRole::Declaration => {
                if let Some(done) = group.take() {
                    blocks.push(done);
                }
                let start = leading.take().map_or(node.start_byte, |(s, _)| s);
                blocks.push(Block {
                    start,
                    end: node.end_byte,
                    name: node.name,
                });
            }
            NodeRole::Other => {
                let start = leading.take().map_or(node.start_byte, |(s, _)| s);
                match group.as_mut() {
                    Some(open) => open.end = node.end_byte,
                    None => {
                        group = Some(Block {
                            start,
                            end: node.end_byte,
                            name: None,
                        })
                    }
                }
            }
        }
    }
    if let Some(done) = group.take() {
        blocks.push(done);
    }
    if let Some((start, end)) = leading {
        match blocks.last_mut() {
            Some(last) => last.end = last.end.max(end),
            None => blocks.push(Block {
                start,
                end,
                name: None,
            }),
        }
    }
    blocks
}

/// Split Markdown into heading sections, ignoring `#` lines inside fenced code
fn markdown_blocks(content: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current = Block {
        start: 0,
        end: 0,
        name: None,
    };
    let mut fence: Option<&str> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let stripped = body.trim_start();
        match fence {
            Some(marker) => {
                if stripped.starts_with(marker) {
                    fence = None;
                }
            }
            None if stripped.starts_with("```") => fence = Some("```"),
            None if stripped.starts_with("~~~") => fence = Some("~~~"),
            None => {
                if let Some(caps) = MARKDOWN_HEADING.captures(body) {
                    if offset > current.start {
                        current.end = offset;
                        blocks.push(current);
                    }
                    current = Block {
                        start: offset,
                        end: offset,
                        name: caps.get(1).map(|m| m.as_str().to_string()),
                    };
                }
            }
        }
        offset += line.len();
    }
    current.end = content.len();
    if current.end > current.start {
        blocks.push(current);
    }
    blocks
}
