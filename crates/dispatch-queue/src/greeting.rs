//! Opening-greeting variation so consecutive messages do not look identical.

use std::sync::OnceLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

const GREETINGS: &[&str] = &["Olá", "Oi"];

fn greeting_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(Olá|Ola|Oi)\b").ok())
        .as_ref()
}

/// Swap a leading greeting for a random one. Other text is left untouched.
pub(crate) fn vary_greeting<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let Some(pattern) = greeting_pattern() else {
        return text.to_string();
    };
    let Some(found) = pattern.find(text) else {
        return text.to_string();
    };

    let greeting = GREETINGS.choose(rng).copied().unwrap_or("Olá");
    format!("{}{}", greeting, &text[found.end()..])
}
