use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

/// Sentinel standing in for an extracted fenced code block during splitting.
const CODE_BLOCK_SENTINEL: &str = "[CODE_BLOCK]";

/// A bounded-token slice of a document's plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// The text content of this chunk.
    pub text: String,
    /// Approximate character offset of the chunk start in the input.
    pub start_index: usize,
    /// Approximate character offset of the chunk end in the input.
    pub end_index: usize,
    /// Token count at packing time (before code-block re-insertion).
    pub token_count: usize,
    /// Metadata shallow-copied from the caller.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Global cached tokenizer for token counting.
static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();

fn get_tokenizer() -> &'static CoreBPE {
    TOKENIZER
        .get_or_init(|| tiktoken_rs::cl100k_base().expect("failed to load cl100k_base tokenizer"))
}

/// Count tokens using the cl100k_base tokenizer.
pub fn count_tokens(text: &str) -> usize {
    get_tokenizer().encode_ordinary(text).len()
}

/// Rough token estimate used for context budgeting: one token per three
/// characters, conservative for mixed Chinese/English text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 3
}

static FENCED_CODE: OnceLock<Regex> = OnceLock::new();
static BLANK_RUN: OnceLock<Regex> = OnceLock::new();

fn fenced_code_re() -> &'static Regex {
    FENCED_CODE.get_or_init(|| Regex::new(r"(?s)```.*?```").unwrap())
}

fn blank_run_re() -> &'static Regex {
    BLANK_RUN.get_or_init(|| Regex::new(r"\n\n+").unwrap())
}

/// Splits plain text into overlapping semantic chunks with token budgeting.
///
/// Sentences are the packing unit: English terminators (`.!?` + whitespace),
/// Chinese terminators (`。！？`, no whitespace required), and blank-line
/// runs all end a sentence. Fenced code blocks are extracted up front and
/// each sentinel is treated as one atomic sentence, so a code block can
/// never be split across chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    preserve_code_blocks: bool,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(512, 102, true)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, preserve_code_blocks: bool) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            preserve_code_blocks,
        }
    }

    /// Chunk plain text. Empty or whitespace-only input yields no chunks.
    pub fn chunk_text(
        &self,
        text: &str,
        metadata: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let metadata = metadata.cloned().unwrap_or_default();

        // Pull code blocks out so splitting cannot cut through them.
        let (code_blocks, working_text) = if self.preserve_code_blocks {
            extract_code_blocks(text)
        } else {
            (Vec::new(), text.to_string())
        };

        let sentences = split_sentences(&working_text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;
        let mut current_start = 0usize;

        for sentence in sentences {
            let sentence_tokens = count_tokens(&sentence);

            if current_tokens + sentence_tokens > self.chunk_size && !current.is_empty() {
                let chunk_text = current.join(" ");
                let chunk_end = current_start + chunk_text.chars().count();
                chunks.push(Chunk {
                    text: chunk_text,
                    start_index: current_start,
                    end_index: chunk_end,
                    token_count: current_tokens,
                    metadata: metadata.clone(),
                });

                // Seed the next chunk with the previous tail, newest last.
                let mut overlap: Vec<String> = Vec::new();
                let mut overlap_tokens = 0usize;
                for sent in current.iter().rev() {
                    let tokens = count_tokens(sent);
                    if overlap_tokens + tokens <= self.chunk_overlap {
                        overlap.insert(0, sent.clone());
                        overlap_tokens += tokens;
                    } else {
                        break;
                    }
                }

                let overlap_len: usize = overlap.join(" ").chars().count();
                current_start = chunk_end.saturating_sub(overlap_len);
                current = overlap;
                current_tokens = overlap_tokens;
            }

            current_tokens += sentence_tokens;
            current.push(sentence);
        }

        if !current.is_empty() {
            let chunk_text = current.join(" ");
            let end = current_start + chunk_text.chars().count();
            chunks.push(Chunk {
                text: chunk_text,
                start_index: current_start,
                end_index: end,
                token_count: current_tokens,
                metadata,
            });
        }

        if self.preserve_code_blocks && !code_blocks.is_empty() {
            reinsert_code_blocks(&mut chunks, &code_blocks);
        }

        chunks
    }

    /// Chunk a document, seeding each chunk's metadata with title, headings
    /// and tags.
    pub fn chunk_document(
        &self,
        content: &str,
        title: &str,
        headings: &[String],
        tags: &[String],
    ) -> Vec<Chunk> {
        let mut metadata = serde_json::Map::new();
        metadata.insert("title".into(), serde_json::Value::String(title.into()));
        metadata.insert(
            "headings".into(),
            serde_json::Value::Array(
                headings
                    .iter()
                    .map(|h| serde_json::Value::String(h.clone()))
                    .collect(),
            ),
        );
        metadata.insert(
            "tags".into(),
            serde_json::Value::Array(
                tags.iter()
                    .map(|t| serde_json::Value::String(t.clone()))
                    .collect(),
            ),
        );
        self.chunk_text(content, Some(&metadata))
    }
}

/// Extract fenced code blocks, replacing each with the sentinel.
/// Returns the blocks in document order plus the cleaned text.
fn extract_code_blocks(text: &str) -> (Vec<String>, String) {
    let re = fenced_code_re();
    let blocks: Vec<String> = re.find_iter(text).map(|m| m.as_str().to_string()).collect();
    let cleaned = re.replace_all(text, CODE_BLOCK_SENTINEL).into_owned();
    (blocks, cleaned)
}

/// Split text into sentences. Each code-block sentinel is kept as one
/// atomic sentence regardless of surrounding punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for block in blank_run_re().split(text) {
        let mut fragments = block.split(CODE_BLOCK_SENTINEL).peekable();
        while let Some(fragment) = fragments.next() {
            split_fragment(fragment, &mut sentences);
            if fragments.peek().is_some() {
                sentences.push(CODE_BLOCK_SENTINEL.to_string());
            }
        }
    }
    sentences
}

/// Split a sentinel-free fragment on sentence terminators.
fn split_fragment(fragment: &str, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut chars = fragment.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        match c {
            '。' | '！' | '？' => {
                push_trimmed(&mut current, out);
            }
            '.' | '!' | '?' => {
                if chars.peek().is_some_and(|n| n.is_whitespace()) {
                    while chars.peek().is_some_and(|n| n.is_whitespace()) {
                        chars.next();
                    }
                    push_trimmed(&mut current, out);
                }
            }
            _ => {}
        }
    }
    push_trimmed(&mut current, out);
}

fn push_trimmed(current: &mut String, out: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}

/// Replace sentinels with the saved code blocks, in document order across
/// the whole chunk sequence.
fn reinsert_code_blocks(chunks: &mut [Chunk], code_blocks: &[String]) {
    let mut blocks = code_blocks.iter();
    for chunk in chunks.iter_mut() {
        while chunk.text.contains(CODE_BLOCK_SENTINEL) {
            match blocks.next() {
                Some(block) => {
                    chunk.text = chunk.text.replacen(CODE_BLOCK_SENTINEL, block, 1);
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tokens_empty() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn count_tokens_nonzero() {
        assert!(count_tokens("hello world") > 0);
    }

    #[test]
    fn estimate_tokens_is_chars_over_three() {
        assert_eq!(estimate_tokens("123456789"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_text("", None).is_empty());
        assert!(chunker.chunk_text("   \n\n  ", None).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_text("One sentence. Another one.", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_index, 0);
        assert!(chunks[0].token_count > 0);
    }

    #[test]
    fn english_sentence_splitting() {
        let sentences = split_sentences("First one. Second here! Third now? Done");
        assert_eq!(
            sentences,
            vec!["First one.", "Second here!", "Third now?", "Done"]
        );
    }

    #[test]
    fn chinese_sentence_splitting_without_whitespace() {
        let sentences = split_sentences("第一句。第二句！第三句？");
        assert_eq!(sentences, vec!["第一句。", "第二句！", "第三句？"]);
    }

    #[test]
    fn blank_lines_split_sentences() {
        let sentences = split_sentences("paragraph one\n\nparagraph two");
        assert_eq!(sentences, vec!["paragraph one", "paragraph two"]);
    }

    #[test]
    fn period_without_space_does_not_split() {
        let sentences = split_sentences("version 1.2 is out. done");
        assert_eq!(sentences, vec!["version 1.2 is out.", "done"]);
    }

    #[test]
    fn long_text_produces_overlapping_chunks() {
        let sentence = "This is a reasonably long sentence used to fill up the token budget of a chunk. ";
        let text = sentence.repeat(60);
        let chunker = Chunker::new(100, 20, true);
        let chunks = chunker.chunk_text(&text, None);

        assert!(chunks.len() > 1);
        // Budget bound: small overrun tolerated for the trailing sentence.
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 120,
                "chunk exceeds 1.2x budget: {}",
                chunk.token_count
            );
        }
        // Overlap: consecutive chunks share the seam sentence.
        let first_tail = chunks[0].text.split(". ").last().unwrap().to_string();
        assert!(chunks[1].text.contains(first_tail.trim_end_matches('.')));
    }

    #[test]
    fn offsets_are_monotonic() {
        let text = "Alpha sentence here. ".repeat(80);
        let chunker = Chunker::new(64, 16, true);
        let chunks = chunker.chunk_text(&text, None);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_index <= pair[1].start_index);
            assert!(pair[0].end_index <= pair[1].end_index);
        }
    }

    #[test]
    fn code_block_kept_intact() {
        let text = format!(
            "Intro sentence. {}\n```rust\nfn main() {{\n    println!(\"hi\");\n}}\n```\nOutro sentence.",
            "Padding sentence here. ".repeat(10)
        );
        let chunker = Chunker::new(512, 50, true);
        let chunks = chunker.chunk_text(&text, None);

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("fn main()"));
        assert!(!joined.contains(CODE_BLOCK_SENTINEL));
        // The fence must appear in exactly one chunk.
        let holders = chunks.iter().filter(|c| c.text.contains("```rust")).count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn multiple_code_blocks_restored_in_order() {
        let text = "One. ```a\nfirst\n``` Two. ```b\nsecond\n``` Three.";
        let chunker = Chunker::default();
        let chunks = chunker.chunk_text(text, None);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        let first = joined.find("first").unwrap();
        let second = joined.find("second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn code_blocks_dropped_when_preservation_off() {
        let text = "Keep this. ```rust\nskip\n``` And this.";
        let chunker = Chunker::new(512, 50, false);
        let chunks = chunker.chunk_text(text, None);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        // Without extraction the fence is split like ordinary text but retained.
        assert!(joined.contains("skip"));
    }

    #[test]
    fn metadata_copied_into_each_chunk() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), serde_json::Value::String("a.md".into()));
        let text = "Sentence one goes here. ".repeat(60);
        let chunker = Chunker::new(64, 16, true);
        let chunks = chunker.chunk_text(&text, Some(&metadata));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.get("source").unwrap(), "a.md");
        }
    }

    #[test]
    fn chunk_document_seeds_metadata() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_document(
            "Some content here.",
            "My Title",
            &["H1".to_string()],
            &["tag1".to_string()],
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.get("title").unwrap(), "My Title");
        assert_eq!(chunks[0].metadata.get("tags").unwrap()[0], "tag1");
    }

    #[test]
    fn chunk_serde_round_trip() {
        let chunk = Chunk {
            text: "hello".into(),
            start_index: 0,
            end_index: 5,
            token_count: 1,
            metadata: serde_json::Map::new(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, "hello");
        assert_eq!(back.end_index, 5);
    }
}
