use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::query::QueryContext;

/// Answer confidence derived from the mean retrieval score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn from_mean_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::High => "高",
            Self::Medium => "中",
            Self::Low => "低",
        }
    }
}

/// A source citation attached to a formatted response.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// 1-based index matching the `[Source N]` context labels.
    pub source_id: usize,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Chunk content truncated to 200 characters.
    pub snippet: String,
}

impl Citation {
    pub fn to_markdown(&self) -> String {
        let mut line_info = format!("第{}", self.start_line);
        if self.end_line > self.start_line {
            line_info.push_str(&format!("-{}", self.end_line));
        }
        line_info.push('行');
        format!(
            "[來源 {}] {} ({})\n{}",
            self.source_id, self.file_path, line_info, self.snippet
        )
    }
}

/// An LLM answer shaped for presentation: cleaned content, citations,
/// and a confidence tag.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedResponse {
    pub content: String,
    pub citations: Vec<Citation>,
    pub has_local_data: bool,
    pub confidence: Option<Confidence>,
}

impl FormattedResponse {
    pub fn to_markdown(&self) -> String {
        if !self.has_local_data {
            return self.content.clone();
        }

        let mut result = self.content.clone();
        if let Some(confidence) = self.confidence {
            result = format!("*信心度：{}*\n\n{}", confidence.label(), result);
        }

        if !self.citations.is_empty() {
            result.push_str("\n\n---\n\n## 📚 參考來源\n");
            for citation in &self.citations {
                result.push_str(&format!("\n{}\n", citation.to_markdown()));
            }
        }

        result
    }
}

struct CleanPatterns {
    zh_citation: Regex,
    en_citation: Regex,
    bare_citation: Regex,
    blank_runs: Regex,
}

static CLEAN: OnceLock<CleanPatterns> = OnceLock::new();

fn clean_patterns() -> &'static CleanPatterns {
    CLEAN.get_or_init(|| CleanPatterns {
        zh_citation: Regex::new(r"\[來源\s*\d+\]").unwrap(),
        en_citation: Regex::new(r"\[Source\s*\d+\]").unwrap(),
        bare_citation: Regex::new(r"\[\d+\]").unwrap(),
        blank_runs: Regex::new(r"\n{3,}").unwrap(),
    })
}

/// Shapes raw LLM output into a `FormattedResponse`.
#[derive(Debug, Default)]
pub struct ResponseGenerator {
    include_confidence: bool,
    suggest_external: bool,
}

impl ResponseGenerator {
    pub fn new(include_confidence: bool, suggest_external: bool) -> Self {
        Self {
            include_confidence,
            suggest_external,
        }
    }

    /// Format an LLM answer: strip inline citation markers, collapse
    /// blank runs, and attach citations built from the context chunks.
    pub fn format_response(
        &self,
        llm_response: &str,
        context: &QueryContext,
        has_local_data: bool,
    ) -> FormattedResponse {
        let citations = self.extract_citations(context);
        let content = clean_response(llm_response);
        let confidence = (has_local_data && self.include_confidence)
            .then(|| Confidence::from_mean_score(mean_score(context)));

        FormattedResponse {
            content,
            citations,
            has_local_data,
            confidence,
        }
    }

    /// Canned response when no local data matched the query.
    pub fn format_no_results_response(&self, query: &str) -> FormattedResponse {
        let mut content = format!("📭 本機資料庫中未找到與「{query}」相關的資料。\n\n");
        if self.suggest_external {
            content.push_str("💡 建議：\n");
            content.push_str("- 檢查查詢關鍵字是否正確\n");
            content.push_str("- 確認相關文件是否已加入資料庫\n");
            content.push_str("- 可以嘗試使用外部搜尋引擎查詢\n\n");
            content.push_str("🔍 外部搜尋建議：\n");
            content.push_str(&format!("- Google: `{query}`\n"));
            content.push_str("- 相關文件: 可能需要先建立相關筆記");
        }

        FormattedResponse {
            content,
            citations: Vec::new(),
            has_local_data: false,
            confidence: None,
        }
    }

    /// Format a document summary with a single whole-document citation.
    pub fn format_summary_response(
        &self,
        summary: &str,
        document_path: &str,
        total_chunks: usize,
    ) -> FormattedResponse {
        let content = format!(
            "# 📝 文件摘要\n\n**文件**: {document_path}\n**處理區塊**: {total_chunks} 個\n\n---\n\n{summary}"
        );

        FormattedResponse {
            content,
            citations: vec![Citation {
                source_id: 1,
                file_path: document_path.to_string(),
                start_line: 1,
                end_line: total_chunks,
                snippet: "完整文件摘要".to_string(),
            }],
            has_local_data: true,
            confidence: None,
        }
    }

    fn extract_citations(&self, context: &QueryContext) -> Vec<Citation> {
        context
            .retrieved_chunks
            .iter()
            .enumerate()
            .map(|(idx, result)| Citation {
                source_id: idx + 1,
                file_path: result.document_path.clone(),
                start_line: result.chunk.start_line,
                end_line: result.chunk.end_line,
                snippet: truncate_snippet(&result.chunk.content, 200),
            })
            .collect()
    }
}

/// Remove citation markers and collapse 3+ blank lines to 2.
fn clean_response(response: &str) -> String {
    let p = clean_patterns();
    let cleaned = p.zh_citation.replace_all(response, "");
    let cleaned = p.en_citation.replace_all(&cleaned, "");
    let cleaned = p.bare_citation.replace_all(&cleaned, "");
    let cleaned = p.blank_runs.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}

/// Mean retrieval score over the context chunks (0 when empty).
fn mean_score(context: &QueryContext) -> f64 {
    if context.retrieved_chunks.is_empty() {
        return 0.0;
    }
    context.retrieved_chunks.iter().map(|r| r.score).sum::<f64>()
        / context.retrieved_chunks.len() as f64
}

/// Truncate to `max` characters, appending `...` when cut.
fn truncate_snippet(content: &str, max: usize) -> String {
    if content.chars().count() <= max {
        content.to_string()
    } else {
        let cut: String = content.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentChunk;
    use crate::rag::query::RetrievalResult;

    fn context_with_scores(scores: &[f64]) -> QueryContext {
        let retrieved_chunks = scores
            .iter()
            .enumerate()
            .map(|(i, &score)| RetrievalResult {
                score,
                document_path: format!("notes/doc{i}.md"),
                chunk: DocumentChunk {
                    chunk_id: format!("doc{i}_0"),
                    document_id: format!("notes/doc{i}.md"),
                    content: format!("chunk content {i}"),
                    start_line: 1,
                    end_line: 4,
                    metadata: serde_json::Map::new(),
                    embedding: None,
                },
            })
            .collect();
        QueryContext {
            query: "q".into(),
            retrieved_chunks,
            total_tokens: 10,
            context_text: "ctx".into(),
        }
    }

    #[test]
    fn citation_markers_stripped() {
        assert_eq!(clean_response("答案 [來源 1] 在此 [Source 2] 和 [3]"), "答案  在此  和");
    }

    #[test]
    fn blank_runs_collapsed() {
        assert_eq!(clean_response("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_response("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn citations_built_from_context() {
        let generator = ResponseGenerator::new(true, true);
        let context = context_with_scores(&[0.9, 0.8]);
        let response = generator.format_response("answer [來源 1]", &context, true);

        assert_eq!(response.citations.len(), 2);
        assert_eq!(response.citations[0].source_id, 1);
        assert_eq!(response.citations[0].file_path, "notes/doc0.md");
        assert_eq!(response.content, "answer");
        assert!(response.has_local_data);
    }

    #[test]
    fn snippet_truncated_at_200_chars() {
        let long = "x".repeat(250);
        let snippet = truncate_snippet(&long, 200);
        assert_eq!(snippet.chars().count(), 203);
        assert!(snippet.ends_with("..."));

        let short = truncate_snippet("short", 200);
        assert_eq!(short, "short");
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(Confidence::from_mean_score(0.75), Confidence::High);
        assert_eq!(Confidence::from_mean_score(0.7), Confidence::High);
        assert_eq!(Confidence::from_mean_score(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_mean_score(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_mean_score(0.3), Confidence::Low);
    }

    #[test]
    fn confidence_from_mean_of_context() {
        let generator = ResponseGenerator::new(true, true);
        let context = context_with_scores(&[0.9, 0.6]);
        let response = generator.format_response("ans", &context, true);
        assert_eq!(response.confidence, Some(Confidence::High));

        let generator_off = ResponseGenerator::new(false, true);
        let response = generator_off.format_response("ans", &context, true);
        assert!(response.confidence.is_none());
    }

    #[test]
    fn no_results_response_suggests_external() {
        let generator = ResponseGenerator::new(true, true);
        let response = generator.format_no_results_response("量子力學");
        assert!(!response.has_local_data);
        assert!(response.citations.is_empty());
        assert!(response.content.contains("量子力學"));
        assert!(response.content.contains("外部搜尋"));

        let quiet = ResponseGenerator::new(true, false);
        let response = quiet.format_no_results_response("量子力學");
        assert!(!response.content.contains("外部搜尋"));
    }

    #[test]
    fn markdown_rendering_includes_citations() {
        let generator = ResponseGenerator::new(true, true);
        let context = context_with_scores(&[0.9]);
        let response = generator.format_response("the answer", &context, true);
        let markdown = response.to_markdown();

        assert!(markdown.contains("信心度"));
        assert!(markdown.contains("參考來源"));
        assert!(markdown.contains("[來源 1] notes/doc0.md"));
        assert!(markdown.contains("第1-4行"));
    }

    #[test]
    fn markdown_without_local_data_is_plain() {
        let generator = ResponseGenerator::new(true, true);
        let response = generator.format_no_results_response("x");
        assert_eq!(response.to_markdown(), response.content);
    }

    #[test]
    fn summary_response_single_citation() {
        let generator = ResponseGenerator::new(true, true);
        let response = generator.format_summary_response("重點整理", "notes/a.md", 7);
        assert!(response.content.contains("notes/a.md"));
        assert!(response.content.contains("7 個"));
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].end_line, 7);
    }
}
