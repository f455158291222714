//! Synthetic prompt generation.
//!
//! Content length is driven by a fixed English heuristic of four characters
//! per token and never exceeds [`MAX_PROMPT_CHARS`]. Three strategies exist:
//! - `Repeat`: a seed paragraph padded with a fixed elaboration block
//! - `Random`: word salad drawn from a vocabulary, defeating prompt caches
//! - fixed prefix: one string reused verbatim by every request (see [`PromptSource`])

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::error::{ConfigError, Result};

/// Approximate characters per token for English text
pub const CHARS_PER_TOKEN: usize = 4;

/// Hard ceiling on generated content, whatever the requested context size
pub const MAX_PROMPT_CHARS: usize = 100_000;

const SENTENCE_MIN_WORDS: usize = 10;
const SENTENCE_MAX_WORDS: usize = 20;

const SEED_PARAGRAPH: &str =
    "Explain how the attention mechanism in transformer models works. Aim for roughly 500 words.";

const ELABORATION: &str = " The following text only exists to make the context longer. \
Attention lets a model weigh every position of the input sequence when it produces the next token, \
which is what allows it to track dependencies that span long stretches of text. \
Scaled dot-product attention multiplies query and key vectors, divides by the square root of the key \
dimension and applies a softmax, turning raw scores into a probability distribution. \
Those probabilities weight the value vectors, and the weighted sum becomes the output for that position. \
Multiple heads run this computation in parallel over different learned projections, so one head can \
follow syntax while another follows coreference. Because every position attends to every other, \
the distance between two related words does not matter, which is why transformers handle long \
documents and multi-turn conversations well.";

/// Default word list for the randomized strategy
pub const DEFAULT_VOCABULARY: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "computer", "science",
    "artificial", "intelligence", "machine", "learning", "deep", "neural", "network", "algorithm",
    "data", "analysis", "statistical", "model", "prediction", "accuracy", "performance",
    "optimization", "development", "programming", "software", "hardware", "architecture", "design",
    "implementation", "testing", "deployment", "monitoring", "maintenance", "security", "privacy",
    "encryption", "decryption", "database", "storage", "retrieval", "processing", "computation",
    "simulation", "experiment", "research", "discovery", "innovation", "technology", "application",
    "interface", "user", "experience", "framework", "library", "module", "component",
    "integration", "compatibility", "scalability", "reliability",
];

/// How generated content is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    /// Word salad, different on every call
    #[default]
    Random,
    /// Deterministic filler text
    Repeat,
}

impl std::fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptStyle::Random => write!(f, "random"),
            PromptStyle::Repeat => write!(f, "repeat"),
        }
    }
}

impl std::str::FromStr for PromptStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" => Ok(PromptStyle::Random),
            "repeat" => Ok(PromptStyle::Repeat),
            _ => Err(format!("Unknown prompt style: {}", s)),
        }
    }
}

/// Target character count for a token budget, clamped to the safety ceiling
pub fn target_chars(context_tokens: usize) -> usize {
    context_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .min(MAX_PROMPT_CHARS)
}

/// Generates request content of an approximate token length.
///
/// The random source is a type parameter so tests can pin it with a seed.
pub struct PromptGenerator<R = StdRng> {
    style: PromptStyle,
    vocabulary: Vec<String>,
    rng: R,
}

impl PromptGenerator<StdRng> {
    /// Generator over the default vocabulary. `seed` makes output reproducible.
    pub fn new(style: PromptStyle, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            style,
            vocabulary: DEFAULT_VOCABULARY.iter().map(|w| w.to_string()).collect(),
            rng,
        }
    }
}

impl<R: Rng> PromptGenerator<R> {
    /// Generator with a caller-supplied vocabulary and random source.
    ///
    /// Fails with [`ConfigError::EmptyVocabulary`] instead of ever looping on
    /// a word list that cannot grow the text.
    pub fn with_vocabulary(style: PromptStyle, vocabulary: Vec<String>, rng: R) -> Result<Self> {
        if vocabulary.is_empty() {
            return Err(ConfigError::EmptyVocabulary);
        }
        Ok(Self {
            style,
            vocabulary,
            rng,
        })
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    /// Produce content for roughly `context_tokens` tokens
    pub fn generate(&mut self, context_tokens: usize) -> String {
        match self.style {
            PromptStyle::Random => self.random_text(context_tokens),
            PromptStyle::Repeat => repeated_text(context_tokens),
        }
    }

    fn random_text(&mut self, context_tokens: usize) -> String {
        let target = target_chars(context_tokens);
        let mut sentences: Vec<String> = Vec::new();
        let mut length = 0;

        while length < target {
            let words = self.rng.gen_range(SENTENCE_MIN_WORDS..=SENTENCE_MAX_WORDS);
            let mut sentence = String::new();
            for i in 0..words {
                if i > 0 {
                    sentence.push(' ');
                }
                let word = &self.vocabulary[self.rng.gen_range(0..self.vocabulary.len())];
                sentence.push_str(word);
            }
            sentence.push('.');

            // +1 for the joining space
            length += sentence.chars().count() + 1;
            sentences.push(sentence);
        }

        let half = sentences.len() / 2;
        let mut text = format!(
            "User query: {}\n\nAssistant response: {}",
            sentences[..half].join(" "),
            sentences[half..].join(" ")
        );
        truncate_chars(&mut text, target);
        text
    }
}

fn repeated_text(context_tokens: usize) -> String {
    let target = target_chars(context_tokens);
    let mut text = String::with_capacity(target + ELABORATION.len());
    text.push_str(SEED_PARAGRAPH);
    while text.len() < target {
        text.push_str(ELABORATION);
    }
    truncate_chars(&mut text, target);
    text
}

/// Truncate to at most `max_chars` characters without splitting a code point
fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

/// Where each request's content comes from during one run
pub enum PromptSource<R = StdRng> {
    /// Fresh content per request
    Generated {
        generator: PromptGenerator<R>,
        context_tokens: usize,
    },
    /// The same string for every request, so the server's prefix cache hits
    Fixed(Arc<str>),
}

impl<R: Rng> PromptSource<R> {
    pub fn next_prompt(&mut self) -> Arc<str> {
        match self {
            PromptSource::Generated {
                generator,
                context_tokens,
            } => Arc::from(generator.generate(*context_tokens)),
            PromptSource::Fixed(prefix) => Arc::clone(prefix),
        }
    }
}
