//! Context assembly and answer generation.
//!
//! Retrieved documents are joined, best first, into one context block. With no
//! context the generator is never called.

use crate::document::Document;
use crate::provider::{GenerationProvider, ProviderError};

/// Separator between documents in a context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Default cap on context characters sent to the model.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Rules given to the model ahead of every question.
pub const SYSTEM_PROMPT: &str = "You are a professional data analyst AI.

Rules:
- Use ONLY the retrieved context below
- Do NOT guess or hallucinate
- If information is missing, say so clearly";

/// Joined document contents, in retrieval order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    text: String,
    documents: usize,
}

impl Context {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// How many documents made it into the block.
    pub fn documents(&self) -> usize {
        self.documents
    }

    /// True when there is nothing usable to ground an answer in.
    pub fn is_empty(&self) -> bool {
        self.documents == 0 || self.text.trim().is_empty()
    }
}

/// Outcome of [answer].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Generated(String),
    /// Nothing was retrieved, so nothing was asked of the model.
    InsufficientContext,
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Generated(s) => s.as_str(),
            Answer::InsufficientContext => "I don't have enough indexed information to answer that. Upload and index some data first.",
        }
    }
}

/// Join document contents with a blank line, preserving order.
pub fn assemble_context<'a, I>(docs: I) -> Context
where
    I: IntoIterator<Item = &'a Document>,
{
    assemble_context_within(docs, usize::MAX)
}

/// Like [assemble_context], but stops before the first document that would push
/// the block past `max_chars`. The top document is always kept whole.
pub fn assemble_context_within<'a, I>(docs: I, max_chars: usize) -> Context
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut text = String::new();
    let mut used = 0usize;
    let mut documents = 0;
    for doc in docs {
        let len = doc.content().chars().count();
        let sep = if documents == 0 { 0 } else { CONTEXT_SEPARATOR.len() };
        if documents > 0 && used + sep + len > max_chars {
            tracing::debug!(kept = documents, "context budget reached; dropping lower-ranked documents");
            break;
        }
        if documents > 0 {
            text.push_str(CONTEXT_SEPARATOR);
        }
        text.push_str(doc.content());
        used += sep + len;
        documents += 1;
    }
    Context { text, documents }
}

/// The instruction sent to the generation model.
pub fn build_prompt(question: &str, context: &Context) -> String {
    format!(
        "{SYSTEM_PROMPT}\n\nBased on the following context, answer the question.\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        context.text(),
        question.trim()
    )
}

/// Ask the generation model, unless there is no context to ground it in.
pub async fn answer(
    generator: &dyn GenerationProvider,
    question: &str,
    context: &Context,
) -> Result<Answer, ProviderError> {
    if context.is_empty() {
        return Ok(Answer::InsufficientContext);
    }
    let prompt = build_prompt(question, context);
    let text = generator.generate(&prompt).await?;
    Ok(Answer::Generated(text.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeGenerator;

    #[test]
    fn joins_with_blank_lines_in_order() {
        let docs = vec![Document::with_id("a", "first"), Document::with_id("b", "second")];
        let ctx = assemble_context(&docs);
        assert_eq!(ctx.text(), "first\n\nsecond");
        assert_eq!(ctx.documents(), 2);
    }

    #[test]
    fn budget_drops_lowest_ranked_documents() {
        let docs = vec![
            Document::with_id("a", "x".repeat(10)),
            Document::with_id("b", "y".repeat(10)),
            Document::with_id("c", "z".repeat(10)),
        ];
        let ctx = assemble_context_within(&docs, 25);
        assert_eq!(ctx.documents(), 2);
        assert!(ctx.text().starts_with("xxxxxxxxxx\n\nyyyy"));

        let ctx = assemble_context_within(&docs, 3);
        assert_eq!(ctx.documents(), 1);
    }

    #[tokio::test]
    async fn empty_context_never_calls_the_generator() {
        let generator = FakeGenerator::replying("should not happen");
        let ctx = assemble_context(&Vec::<Document>::new());
        let got = answer(&generator, "what is the mean?", &ctx).await.unwrap();
        assert_eq!(got, Answer::InsufficientContext);
        assert!(generator.prompts().is_empty());

        let blank = vec![Document::with_id("a", "  ")];
        let got = answer(&generator, "q", &assemble_context(&blank)).await.unwrap();
        assert_eq!(got, Answer::InsufficientContext);
    }

    #[tokio::test]
    async fn prompt_carries_context_and_question() {
        let generator = FakeGenerator::replying("  42 rows  ");
        let docs = vec![Document::with_id("a", "Rows: 42")];
        let ctx = assemble_context(&docs);
        let got = answer(&generator, "How many rows?", &ctx).await.unwrap();
        assert_eq!(got, Answer::Generated("42 rows".into()));

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context:\nRows: 42"));
        assert!(prompts[0].contains("Question: How many rows?"));
        assert!(prompts[0].ends_with("Answer:"));
    }

    #[tokio::test]
    async fn generator_failure_is_surfaced() {
        let generator = FakeGenerator::failing("model offline");
        let docs = vec![Document::with_id("a", "Rows: 42")];
        let err = answer(&generator, "q", &assemble_context(&docs)).await.unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }
}
