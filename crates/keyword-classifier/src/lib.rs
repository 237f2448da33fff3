//! Rule-based intent classifier for Portuguese patient replies.
//!
//! Classification runs in priority order and stops at the first hit:
//!
//! ```text
//! raw text ──► normalize ──► direct number (1/2/3) ──► keywords ──► phrase patterns ──► free talk
//!                               conf 1.0                0.85–0.98       0.75              0.3
//! ```
//!
//! Numbers are only meaningful within a flow, so without a flow they classify
//! as [`Intent::Unknown`].

mod dictionary;
mod normalize;

pub use normalize::normalize;

use reply_core::{
    async_trait, ClassificationMethod, ClassifierError, FlowType, Intent, IntentClassification,
    IntentClassifier,
};
use tracing::debug;

use crate::dictionary::{phrase_patterns, KEYWORDS};

/// Confidence given to a single-digit option reply.
const DIRECT_NUMBER_CONFIDENCE: f64 = 1.0;
/// Confidence of a phrase-pattern match.
const PATTERN_CONFIDENCE: f64 = 0.75;
/// Confidence of the free-talk fallback.
const FALLBACK_CONFIDENCE: f64 = 0.3;
/// Each extra keyword hit adds this much.
const KEYWORD_STEP: f64 = 0.05;
const KEYWORD_CAP: f64 = 0.98;

/// Keyword, pattern and number based classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    /// Keyword hits below this confidence defer to phrase patterns first.
    keyword_threshold: f64,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            keyword_threshold: 0.75,
        }
    }

    /// Classify synchronously. Exposed for callers that do not need the trait.
    pub fn classify_text(&self, raw: &str, flow: Option<FlowType>) -> IntentClassification {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return IntentClassification::unknown();
        }

        if let Some(number) = direct_number(&normalized) {
            let intent = flow
                .and_then(|flow| flow.option(number))
                .unwrap_or(Intent::Unknown);
            let confidence = if intent == Intent::Unknown {
                0.0
            } else {
                DIRECT_NUMBER_CONFIDENCE
            };
            return IntentClassification::new(intent, confidence)
                .with_method(ClassificationMethod::DirectNumber)
                .with_normalized_text(normalized);
        }

        let keyword = best_keyword_match(&normalized, flow);
        if let Some((intent, confidence)) = keyword {
            if confidence >= self.keyword_threshold {
                return IntentClassification::new(intent, confidence)
                    .with_method(ClassificationMethod::Keyword)
                    .with_normalized_text(normalized);
            }
        }

        if let Some(intent) = pattern_match(&normalized) {
            return IntentClassification::new(intent, PATTERN_CONFIDENCE)
                .with_method(ClassificationMethod::Pattern)
                .with_normalized_text(normalized);
        }

        if let Some((intent, confidence)) = keyword {
            return IntentClassification::new(intent, confidence)
                .with_method(ClassificationMethod::KeywordLowConfidence)
                .with_normalized_text(normalized);
        }

        IntentClassification::new(Intent::FreeTalk, FALLBACK_CONFIDENCE)
            .with_method(ClassificationMethod::Fallback)
            .with_normalized_text(normalized)
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        flow: Option<FlowType>,
    ) -> Result<IntentClassification, ClassifierError> {
        let classification = self.classify_text(text, flow);
        debug!(
            "Classified {:?} as {} ({:.2}, {})",
            classification.normalized_text,
            classification.intent,
            classification.confidence,
            classification.method.as_str()
        );
        Ok(classification)
    }

    fn name(&self) -> &str {
        "KeywordClassifier"
    }
}

fn direct_number(normalized: &str) -> Option<u8> {
    match normalized {
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        _ => None,
    }
}

/// Words that flip an affirmative keyword placed shortly after them.
const NEGATIONS: &[&str] = &["nao", "nem", "sem", "nunca"];
/// How many words before a keyword are checked for a negation.
const NEGATION_REACH: usize = 2;

/// Whether a negation appears within [`NEGATION_REACH`] words before `start`.
fn negated_at(haystack: &str, start: usize) -> bool {
    haystack[..start]
        .split_whitespace()
        .rev()
        .take(NEGATION_REACH)
        .any(|word| NEGATIONS.contains(&word))
}

/// Whole-word containment on normalized text.
///
/// With `negatable`, occurrences preceded by a negation do not count, so
/// "nao quero remarcar" is not a hit for "remarcar".
fn contains_phrase(haystack: &str, phrase: &str, negatable: bool) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = start == 0 || haystack.as_bytes()[start - 1] == b' ';
        let after_ok = end == haystack.len() || haystack.as_bytes()[end] == b' ';
        before_ok && after_ok && !(negatable && negated_at(haystack, start))
    })
}

/// Affirmative categories whose keywords a preceding negation cancels.
fn is_negatable(intent: Intent, keyword: &str) -> bool {
    matches!(intent, Intent::Confirmed | Intent::WantsReschedule)
        && !NEGATIONS.iter().any(|n| keyword.split(' ').next() == Some(*n))
}

#[derive(Debug, Clone, Copy)]
struct KeywordScore {
    intent: Intent,
    confidence: f64,
    /// Word count of the longest matched keyword.
    longest: usize,
}

/// Highest-confidence keyword category.
///
/// Ties go to the category with the longest matched phrase ("nao quero" over
/// "nao"), then to the flow's own intents.
fn best_keyword_match(normalized: &str, flow: Option<FlowType>) -> Option<(Intent, f64)> {
    let mut best: Option<KeywordScore> = None;
    let own = |intent: Intent| flow.is_some_and(|f| intent.is_compatible_with(f));

    for (intent, base, keywords) in KEYWORDS {
        let matched: Vec<&&str> = keywords
            .iter()
            .filter(|keyword| contains_phrase(normalized, keyword, is_negatable(*intent, keyword)))
            .collect();
        if matched.is_empty() {
            continue;
        }

        let candidate = KeywordScore {
            intent: *intent,
            confidence: (base + matched.len() as f64 * KEYWORD_STEP).min(KEYWORD_CAP),
            longest: matched
                .iter()
                .map(|k| k.split(' ').count())
                .max()
                .unwrap_or(1),
        };
        let better = match best {
            None => true,
            Some(current) => {
                candidate.confidence > current.confidence
                    || (candidate.confidence == current.confidence
                        && (candidate.longest > current.longest
                            || (candidate.longest == current.longest
                                && own(candidate.intent)
                                && !own(current.intent))))
            }
        };
        if better {
            best = Some(candidate);
        }
    }

    best.map(|score| (score.intent, score.confidence))
}

fn pattern_match(normalized: &str) -> Option<Intent> {
    phrase_patterns()
        .iter()
        .find(|(_, pattern)| pattern.is_match(normalized))
        .map(|(intent, _)| *intent)
}
