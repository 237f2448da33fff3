//! Keyword dictionaries and phrase patterns, written against normalized text.

use std::sync::OnceLock;

use regex::Regex;
use reply_core::Intent;
use tracing::warn;

/// `(intent, base confidence, keywords)`; categories are checked in this order.
pub(crate) const KEYWORDS: &[(Intent, f64, &[&str])] = &[
    (
        Intent::Confirmed,
        0.85,
        &[
            "confirmo", "sim", "vou", "presenca", "confirmada", "ok", "confirmado", "estarei",
            "irei", "vou sim", "confirmar", "certo", "tranquilo", "pode ser", "com certeza",
            "claro",
        ],
    ),
    (
        Intent::Declined,
        0.85,
        &[
            "nao", "nao poderei", "nao vou", "faltarei", "desmarcar", "cancelar", "nao posso",
            "impossivel", "impedimento", "nao consigo", "nao conseguirei", "tenho compromisso",
            "nao da",
        ],
    ),
    (
        Intent::NotScheduled,
        0.90,
        &[
            "nao agendei", "nao solicitei", "nao marquei", "nao fui eu", "erro", "engano",
            "nao pedi", "nao era pra mim", "numero errado",
        ],
    ),
    (
        Intent::WantsReschedule,
        0.85,
        &[
            "reagendamento", "reagendar", "remarcar", "nova data", "outra data", "mudar data",
            "marcar novamente", "agendar de novo", "solicito reagendamento",
        ],
    ),
    (
        Intent::PatientInitiatedCancel,
        0.90,
        &[
            "fui eu", "foi eu", "eu pedi", "eu solicitei", "eu desmarquei", "eu mesmo",
            "eu mesma", "solicitei a desmarcacao",
        ],
    ),
    (
        Intent::NoRescheduleWanted,
        0.85,
        &[
            "nao e necessario", "nao precisa", "sem reagendamento", "nao quero", "nao preciso",
            "esta tudo bem", "sem necessidade", "pode deixar",
        ],
    ),
    (
        Intent::HumanAgent,
        0.95,
        &[
            "humano", "atendente", "operador", "falar com alguem", "quero falar",
            "atendimento humano",
        ],
    ),
];

const PHRASE_PATTERNS: &[(Intent, &str)] = &[
    (Intent::Confirmed, r"\bcomparec(o|erei|er)\b"),
    (Intent::Confirmed, r"\bpode(m)? contar comigo\b"),
    (Intent::Declined, r"\b(viajando|internad[oa]|hospitalizad[oa]|doente)\b"),
    (Intent::NotScheduled, r"\bquem (marcou|agendou)\b"),
    (Intent::WantsReschedule, r"\b(outro|outra) (dia|horario|semana|data)\b"),
    (Intent::PatientInitiatedCancel, r"\beu (cancelei|desmarquei)\b"),
];

/// Compiled phrase patterns, built once.
pub(crate) fn phrase_patterns() -> &'static [(Intent, Regex)] {
    static PATTERNS: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();

    PATTERNS.get_or_init(|| {
        PHRASE_PATTERNS
            .iter()
            .filter_map(|(intent, source)| match Regex::new(source) {
                Ok(regex) => Some((*intent, regex)),
                Err(e) => {
                    warn!("Skipping invalid phrase pattern {}: {}", source, e);
                    None
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(phrase_patterns().len(), PHRASE_PATTERNS.len());
    }

    #[test]
    fn test_keywords_are_normalized() {
        for (_, _, keywords) in KEYWORDS {
            for keyword in *keywords {
                assert_eq!(crate::normalize(keyword), *keyword);
            }
        }
    }
}
