//! Prompt templates for the article operations.
//!
//! These are written for small on-device models: short instructions, one task
//! per prompt, no open-ended reasoning.

use crate::capability::{CapabilityOptions, OutputFormat, OutputLength, SummaryType};

/// Reading level targeted by `simplify`
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingLevel {
    /// Light touch: shorter sentences, same vocabulary
    Low,
    Mid,
    /// Plain language a young reader can follow
    High,
}

impl std::str::FromStr for ReadingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ReadingLevel::Low),
            "mid" | "medium" => Ok(ReadingLevel::Mid),
            "high" => Ok(ReadingLevel::High),
            other => Err(format!("unknown reading level '{}'", other)),
        }
    }
}

/// System prompt for the simplify operation.
pub fn simplify_system(level: ReadingLevel) -> String {
    let target = match level {
        ReadingLevel::Low => {
            "Keep the original vocabulary but split long sentences and remove filler."
        }
        ReadingLevel::Mid => {
            "Rewrite for a general audience: common words, one idea per sentence."
        }
        ReadingLevel::High => {
            "Rewrite in plain language a 10-year-old can follow. Explain any technical term in a few words."
        }
    };

    format!(
        r#"You rewrite article text so it is easier to read.
{target}
Keep every fact, name and number. Do not add opinions or new information.
Keep the paragraph structure. Output only the rewritten text."#
    )
}

/// System prompt for answering questions about one article.
pub fn chat_system() -> String {
    r#"You answer questions about the article given as context.
Use only information from the article. If the article does not contain the
answer, say so in one sentence. Be concise."#
        .to_string()
}

/// Context string carrying the article for chat sessions.
pub fn article_context(title: Option<&str>, article: &str) -> String {
    match title {
        Some(title) => format!("<article title=\"{title}\">\n{article}\n</article>"),
        None => format!("<article>\n{article}\n</article>"),
    }
}

/// System prompt for free-form generation.
pub fn generate_system() -> String {
    "You are a helpful writing assistant. Answer directly.".to_string()
}

/// Positional note attached to each chunk of a long input.
pub fn chunk_context(index: usize, total: usize) -> String {
    format!(
        "This is part {} of {} of a longer text. Process only this part.",
        index + 1,
        total
    )
}

/// Context for the final pass over joined chunk results.
pub fn fold_context(parts: usize) -> String {
    format!(
        "The text below joins the results for {} consecutive parts of one document. Merge them into a single coherent result without repeating content.",
        parts
    )
}

/// Build the summarizer system prompt from session options.
pub fn summarizer_system(options: &CapabilityOptions) -> String {
    let shape = match options.summary_type.unwrap_or(SummaryType::KeyPoints) {
        SummaryType::KeyPoints => "Summarize the text as a list of the key points",
        SummaryType::Tldr => "Write a short overview of the text",
        SummaryType::Teaser => "Write a teaser that makes a reader want to read the full text",
        SummaryType::Headline => "Write a single headline that captures the main point of the text",
    };

    let length = match options.length.unwrap_or(OutputLength::Medium) {
        OutputLength::Short => "Keep it very short (about 3 points or 1 sentence).",
        OutputLength::Medium => "Keep it brief (about 5 points or 3 sentences).",
        OutputLength::Long => "Be thorough (about 7 points or a short paragraph).",
    };

    let format = match options.format.unwrap_or(OutputFormat::PlainText) {
        OutputFormat::Markdown => "Use Markdown.",
        OutputFormat::PlainText => "Use plain text without Markdown.",
    };

    let mut system = format!("{shape}. {length} {format}");
    if let Some(tone) = &options.tone {
        system.push_str(&format!(" Use a {tone} tone."));
    }
    if let Some(language) = &options.output_language {
        system.push_str(&format!(" Answer in {language}."));
    }
    system
}

/// Join per-call context with the session's shared context.
pub fn merge_context(shared: Option<&str>, call: Option<&str>) -> Option<String> {
    match (shared, call) {
        (Some(shared), Some(call)) => Some(format!("{shared}\n\n{call}")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}
