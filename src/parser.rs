use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Kind of wikilink reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WikiLinkKind {
    Wikilink,
    WikilinkHeader,
}

/// A `[[Target(#Header)?(|Display)?]]` reference extracted from a note.
#[derive(Debug, Clone, Serialize)]
pub struct WikiLink {
    /// The target note name (without header or display text).
    pub target: String,
    /// Header fragment, if the link addressed a section.
    pub header: Option<String>,
    /// Display text, if the link carried one.
    pub display: Option<String>,
    /// `WikilinkHeader` iff a header fragment is present.
    pub kind: WikiLinkKind,
}

/// Kind of image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Obsidian,
    Markdown,
}

/// An image reference extracted from a note.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRef {
    /// Path as written in the note (usually relative to the note).
    pub path: String,
    /// Obsidian size parameter (`100` or `100x200`), when present.
    pub size: Option<String>,
    /// Alt text for standard Markdown images.
    pub alt: Option<String>,
    pub kind: ImageKind,
}

/// Result of parsing an Obsidian-flavored Markdown note.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedNote {
    /// The full original buffer, frontmatter included.
    pub raw_content: String,
    /// Body after degrading unsupported syntax (code-block titles,
    /// callouts, embeds).
    pub parsed_content: String,
    /// Plain-text projection used for embedding.
    pub plain_text: String,
    /// Frontmatter mapping (empty when absent or invalid).
    pub frontmatter: serde_json::Map<String, serde_json::Value>,
    /// Title: explicit argument first, frontmatter `title` second.
    pub title: Option<String>,
    /// Deduplicated tags, nested-tag prefixes included, insertion order.
    pub tags: Vec<String>,
    /// Frontmatter aliases (string or list; anything else is empty).
    pub aliases: Vec<String>,
    /// ATX headings in document order.
    pub headings: Vec<String>,
    pub wikilinks: Vec<WikiLink>,
    pub images: Vec<ImageRef>,
}

struct Patterns {
    wikilink: Regex,
    tag: Regex,
    obsidian_image: Regex,
    markdown_image: Regex,
    heading: Regex,
    code_block_title: Regex,
    callout: Regex,
    embed: Regex,
    fenced_code: Regex,
    inline_code: Regex,
    bold_star: Regex,
    italic_star: Regex,
    bold_under: Regex,
    italic_under: Regex,
    strike: Regex,
    link: Regex,
    image: Regex,
    heading_marks: Regex,
    html_tag: Regex,
    blank_runs: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        wikilink: Regex::new(r"\[\[([^#\]|]+?)(?:#([^\]|]+?))?(?:\|([^\]]+?))?\]\]").unwrap(),
        tag: Regex::new(r"#([\w\x{4e00}-\x{9fff}_/-]+)").unwrap(),
        obsidian_image: Regex::new(r"!\[(\d+(?:x\d+)?)\]\(([^)]+)\)").unwrap(),
        markdown_image: Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap(),
        heading: Regex::new(r"(?m)^(#{1,6})\s+(.+)$").unwrap(),
        code_block_title: Regex::new("```(\\w+)\\s+title:\"([^\"]+)\"").unwrap(),
        callout: Regex::new(r"(?m)>\s*\[!(\w+)\]\s*(.*)").unwrap(),
        embed: Regex::new(r"!\[\[([^\]]+)\]\]").unwrap(),
        fenced_code: Regex::new(r"(?s)```.*?```").unwrap(),
        inline_code: Regex::new(r"`[^`]+`").unwrap(),
        bold_star: Regex::new(r"\*\*([^*]+)\*\*").unwrap(),
        italic_star: Regex::new(r"\*([^*]+)\*").unwrap(),
        bold_under: Regex::new(r"__([^_]+)__").unwrap(),
        italic_under: Regex::new(r"_([^_]+)_").unwrap(),
        strike: Regex::new(r"~~([^~]+)~~").unwrap(),
        link: Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap(),
        image: Regex::new(r"!\[([^\]]*)\]\([^)]+\)").unwrap(),
        heading_marks: Regex::new(r"(?m)^#{1,6}\s+").unwrap(),
        html_tag: Regex::new(r"<[^>]+>").unwrap(),
        blank_runs: Regex::new(r"\n\s*\n").unwrap(),
    })
}

/// Parser for Obsidian-flavored Markdown.
#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a note from disk. The file must be UTF-8; the title defaults
    /// to the file stem.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedNote> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                Error::Parse {
                    path: path.to_path_buf(),
                    message: "file is not valid UTF-8".into(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let title = path.file_stem().and_then(|s| s.to_str()).map(String::from);
        Ok(self.parse_content(&content, title.as_deref()))
    }

    /// Parse a note from an in-memory buffer.
    pub fn parse_content(&self, content: &str, title: Option<&str>) -> ParsedNote {
        let (frontmatter, body) = split_frontmatter(content);

        let title = title
            .map(String::from)
            .or_else(|| {
                frontmatter
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            });

        let mut tags = extract_frontmatter_tags(&frontmatter);
        for tag in extract_inline_tags(body) {
            push_unique(&mut tags, tag);
        }

        let aliases = extract_aliases(&frontmatter);
        let wikilinks = extract_wikilinks(body);
        let headings = extract_headings(body);
        let images = extract_images(body);
        let parsed_content = degrade_syntax(body);
        let plain_text = to_plain_text(&parsed_content);

        ParsedNote {
            raw_content: content.to_string(),
            parsed_content,
            plain_text,
            frontmatter,
            title,
            tags,
            aliases,
            headings,
            wikilinks,
            images,
        }
    }
}

/// Split an optional leading YAML frontmatter block from the body.
///
/// Invalid YAML degrades to an empty mapping; the body still starts after
/// the closing delimiter so broken metadata never leaks into the content.
fn split_frontmatter(content: &str) -> (serde_json::Map<String, serde_json::Value>, &str) {
    let empty = serde_json::Map::new();

    let rest = match content.strip_prefix("---") {
        Some(rest) if rest.starts_with('\n') || rest.starts_with("\r\n") => rest,
        _ => return (empty, content),
    };

    // Find the closing `---` on its own line.
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if offset > 0 && (trimmed == "---" || trimmed == "...") {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let map = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
                Ok(value) => match serde_json::to_value(value) {
                    Ok(serde_json::Value::Object(map)) => map,
                    _ => empty.clone(),
                },
                Err(e) => {
                    warn!(error = %e, "invalid frontmatter YAML, treating as empty");
                    empty.clone()
                }
            };
            return (map, body);
        }
        offset += line.len();
    }

    (empty, content)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Expand a nested tag into all non-empty prefixes plus itself,
/// e.g. `a/b/c` adds `a/b/c`, `a`, `a/b`.
fn expand_tag(tag: &str, out: &mut Vec<String>) {
    let tag = tag.trim_start_matches('#');
    if tag.is_empty() {
        return;
    }
    push_unique(out, tag.to_string());
    if tag.contains('/') {
        let parts: Vec<&str> = tag.split('/').collect();
        for i in 1..parts.len() {
            let prefix = parts[..i].join("/");
            if !prefix.is_empty() {
                push_unique(out, prefix);
            }
        }
    }
}

fn extract_frontmatter_tags(
    frontmatter: &serde_json::Map<String, serde_json::Value>,
) -> Vec<String> {
    let mut tags = Vec::new();
    match frontmatter.get("tags") {
        Some(serde_json::Value::String(s)) => expand_tag(s, &mut tags),
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    expand_tag(s, &mut tags);
                }
            }
        }
        _ => {}
    }
    tags
}

fn extract_inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for caps in patterns().tag.captures_iter(body) {
        expand_tag(&caps[1], &mut tags);
    }
    tags
}

fn extract_aliases(frontmatter: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
    match frontmatter.get("aliases") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

fn extract_wikilinks(body: &str) -> Vec<WikiLink> {
    patterns()
        .wikilink
        .captures_iter(body)
        .map(|caps| {
            let header = caps.get(2).map(|m| m.as_str().to_string());
            WikiLink {
                target: caps[1].to_string(),
                kind: if header.is_some() {
                    WikiLinkKind::WikilinkHeader
                } else {
                    WikiLinkKind::Wikilink
                },
                header,
                display: caps.get(3).map(|m| m.as_str().to_string()),
            }
        })
        .collect()
}

fn extract_headings(body: &str) -> Vec<String> {
    patterns()
        .heading
        .captures_iter(body)
        .map(|caps| caps[2].trim().to_string())
        .collect()
}

fn extract_images(body: &str) -> Vec<ImageRef> {
    let mut images: Vec<ImageRef> = patterns()
        .obsidian_image
        .captures_iter(body)
        .map(|caps| ImageRef {
            path: caps[2].to_string(),
            size: Some(caps[1].to_string()),
            alt: None,
            kind: ImageKind::Obsidian,
        })
        .collect();

    for caps in patterns().markdown_image.captures_iter(body) {
        let path = caps[2].to_string();
        if images.iter().any(|img| img.path == path) {
            continue;
        }
        images.push(ImageRef {
            path,
            size: None,
            alt: Some(caps[1].to_string()),
            kind: ImageKind::Markdown,
        });
    }

    images
}

/// Degrade unsupported Obsidian syntax to plain Markdown:
/// code-block titles dropped, callouts to blockquotes, embeds to links.
fn degrade_syntax(body: &str) -> String {
    let p = patterns();
    let content = p.code_block_title.replace_all(body, "```${1}");
    let content = p.callout.replace_all(&content, "> ${2}");
    let content = p.embed.replace_all(&content, "[[${1}]]");
    content.into_owned()
}

/// Strip Markdown formatting down to the text that should be embedded.
fn to_plain_text(content: &str) -> String {
    let p = patterns();
    let text = p.fenced_code.replace_all(content, "");
    let text = p.inline_code.replace_all(&text, "");
    // Keep the target name or the display text of each wikilink.
    let text = p.wikilink.replace_all(&text, "${1}${3}");
    let text = p.bold_star.replace_all(&text, "$1");
    let text = p.italic_star.replace_all(&text, "$1");
    let text = p.bold_under.replace_all(&text, "$1");
    let text = p.italic_under.replace_all(&text, "$1");
    let text = p.strike.replace_all(&text, "$1");
    let text = p.link.replace_all(&text, "$1");
    let text = p.image.replace_all(&text, "");
    let text = p.heading_marks.replace_all(&text, "");
    let text = p.html_tag.replace_all(&text, "");
    let text = p.blank_runs.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParsedNote {
        Parser::new().parse_content(content, None)
    }

    #[test]
    fn frontmatter_extracted() {
        let note = parse("---\ntitle: Hello\ntags: [a, b]\n---\nBody text.");
        assert_eq!(note.title.as_deref(), Some("Hello"));
        assert_eq!(note.frontmatter.get("title").unwrap(), "Hello");
        assert_eq!(note.plain_text, "Body text.");
    }

    #[test]
    fn missing_frontmatter_is_all_body() {
        let note = parse("Just content, no metadata.");
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.plain_text, "Just content, no metadata.");
    }

    #[test]
    fn invalid_frontmatter_degrades_to_empty() {
        let note = parse("---\n: not : valid : yaml [\n---\nBody survives.");
        assert!(note.frontmatter.is_empty());
        assert!(note.plain_text.contains("Body survives."));
    }

    #[test]
    fn explicit_title_wins_over_frontmatter() {
        let note = Parser::new().parse_content("---\ntitle: FM\n---\nx", Some("Arg"));
        assert_eq!(note.title.as_deref(), Some("Arg"));
    }

    #[test]
    fn wikilink_variants() {
        let note = parse("[[Doc]] and [[Other|shown]] and [[Ref#Section]] and [[X#S|d]]");
        assert_eq!(note.wikilinks.len(), 4);

        assert_eq!(note.wikilinks[0].target, "Doc");
        assert_eq!(note.wikilinks[0].kind, WikiLinkKind::Wikilink);
        assert!(note.wikilinks[0].header.is_none());

        assert_eq!(note.wikilinks[1].display.as_deref(), Some("shown"));

        assert_eq!(note.wikilinks[2].header.as_deref(), Some("Section"));
        assert_eq!(note.wikilinks[2].kind, WikiLinkKind::WikilinkHeader);

        assert_eq!(note.wikilinks[3].target, "X");
        assert_eq!(note.wikilinks[3].header.as_deref(), Some("S"));
        assert_eq!(note.wikilinks[3].display.as_deref(), Some("d"));
    }

    #[test]
    fn frontmatter_tags_string_and_list() {
        let note = parse("---\ntags: solo\n---\nx");
        assert_eq!(note.tags, vec!["solo"]);

        let note = parse("---\ntags:\n  - one\n  - two\n---\nx");
        assert_eq!(note.tags, vec!["one", "two"]);
    }

    #[test]
    fn nested_tags_expand_prefixes() {
        let note = parse("---\ntags: [a/b/c]\n---\nx");
        assert_eq!(note.tags, vec!["a/b/c", "a", "a/b"]);
    }

    #[test]
    fn inline_tags_including_cjk() {
        let note = parse("Text with #rust and #程式語言/Rust inline.");
        assert!(note.tags.contains(&"rust".to_string()));
        assert!(note.tags.contains(&"程式語言/Rust".to_string()));
        assert!(note.tags.contains(&"程式語言".to_string()));
    }

    #[test]
    fn tags_deduplicated() {
        let note = parse("---\ntags: [rust]\n---\n#rust again #rust");
        assert_eq!(note.tags.iter().filter(|t| *t == "rust").count(), 1);
    }

    #[test]
    fn aliases_string_list_and_other() {
        let note = parse("---\naliases: single\n---\nx");
        assert_eq!(note.aliases, vec!["single"]);

        let note = parse("---\naliases: [a, b]\n---\nx");
        assert_eq!(note.aliases, vec!["a", "b"]);

        let note = parse("---\naliases: 42\n---\nx");
        assert!(note.aliases.is_empty());
    }

    #[test]
    fn headings_in_order() {
        let note = parse("# First\ntext\n## Second\n### Third");
        assert_eq!(note.headings, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn obsidian_and_markdown_images() {
        let note = parse("![100](img.png) and ![200x100](wide.jpg) and ![alt text](plain.png)");
        assert_eq!(note.images.len(), 3);
        assert_eq!(note.images[0].kind, ImageKind::Obsidian);
        assert_eq!(note.images[0].size.as_deref(), Some("100"));
        assert_eq!(note.images[1].size.as_deref(), Some("200x100"));
        assert_eq!(note.images[2].kind, ImageKind::Markdown);
        assert_eq!(note.images[2].alt.as_deref(), Some("alt text"));
    }

    #[test]
    fn markdown_image_not_duplicated_when_obsidian_sized() {
        let note = parse("![100](same.png)");
        assert_eq!(note.images.len(), 1);
        assert_eq!(note.images[0].kind, ImageKind::Obsidian);
    }

    #[test]
    fn code_block_title_degraded() {
        let note = parse("```rust title:\"example.rs\"\nfn main() {}\n```");
        assert!(note.parsed_content.contains("```rust\n"));
        assert!(!note.parsed_content.contains("title:"));
    }

    #[test]
    fn callout_degraded_to_blockquote() {
        let note = parse("> [!note] Remember this");
        assert!(note.parsed_content.contains("> Remember this"));
        assert!(!note.parsed_content.contains("[!note]"));
    }

    #[test]
    fn embed_degraded_to_wikilink() {
        let note = parse("![[Embedded Note]]");
        assert!(note.parsed_content.contains("[[Embedded Note]]"));
        assert!(!note.parsed_content.contains("![["));
    }

    #[test]
    fn plain_text_strips_formatting() {
        let note = parse("**bold** and *italic* and `code` and [link](http://x) here");
        assert_eq!(note.plain_text, "bold and italic and  and link here");
    }

    #[test]
    fn plain_text_keeps_wikilink_display() {
        let note = parse("See [[Target|the rules]] for details");
        assert!(note.plain_text.contains("the rules"));
        assert!(!note.plain_text.contains("Target"));
    }

    #[test]
    fn plain_text_keeps_wikilink_target_without_display() {
        let note = parse("See [[Target]] for details");
        assert!(note.plain_text.contains("Target"));
        assert!(!note.plain_text.contains("[["));
    }

    #[test]
    fn plain_text_drops_code_blocks() {
        let note = parse("Before\n\n```rust\nfn hidden() {}\n```\n\nAfter");
        assert!(!note.plain_text.contains("hidden"));
        assert!(note.plain_text.contains("Before"));
        assert!(note.plain_text.contains("After"));
    }

    #[test]
    fn plain_text_collapses_blank_runs() {
        let note = parse("One\n\n\n\nTwo");
        assert_eq!(note.plain_text, "One\n\nTwo");
    }

    #[test]
    fn raw_content_preserved() {
        let content = "---\ntitle: T\n---\n# Body";
        let note = parse(content);
        assert_eq!(note.raw_content, content);
    }
}
