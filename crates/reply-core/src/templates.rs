//! Texts sent back to patients.
//!
//! Templates use `{name}` placeholders. The set is loaded with a fallback chain:
//!
//! 1. `REPLY_TEMPLATES_FILE` (JSON file, missing keys fall back to defaults)
//! 2. Embedded defaults

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::flow::{FlowType, Intent};
use crate::message::ReplyButton;

/// Replace every `{key}` in `template` with its value.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{key}}}"), value)
    })
}

/// Every text the core sends on its own initiative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyTemplates {
    /// Offset applied when printing appointment dates.
    pub utc_offset_hours: i32,
    /// Sent when a patient writes without any pending system message.
    pub scope_explanation: String,
    /// Sent after too many replies that could not be understood.
    pub sign_off: String,
    /// `{summary}`, `{options}`
    pub incompatible_intent: String,
    /// `{count}`, `{items}`
    pub ambiguity: String,
    /// `{label}`, `{number}`
    pub confirm_prompt: String,
    /// `{options}`
    pub generic_clarification: String,
    pub ack_confirmed: String,
    pub ack_declined: String,
    pub ack_not_scheduled: String,
    pub ack_wants_reschedule: String,
    pub ack_patient_initiated_cancel: String,
    pub ack_no_reschedule_wanted: String,
    /// `{name}`, `{specialty}`, `{date}`
    pub confirmation_request: String,
    /// `{name}`, `{specialty}`, `{date}`
    pub cancellation_notice: String,
    /// `{name}`, `{specialty}`, `{date}`
    pub new_date_confirmation: String,
    /// `{specialty}`, `{date}`
    pub summary: String,
}

impl Default for ReplyTemplates {
    fn default() -> Self {
        Self {
            utc_offset_hours: -3,
            scope_explanation: "Olá! Este é o canal de confirmação de consultas da Central de Marcação. \
                Por aqui enviamos avisos sobre suas consultas e recebemos suas respostas. \
                Para outros assuntos, procure a Central de Marcação pelos canais oficiais."
                .to_string(),
            sign_off: "Não conseguimos entender sua resposta. Um atendente da Central de Marcação \
                vai verificar sua mensagem. Obrigado pela paciência."
                .to_string(),
            incompatible_intent: "Sua resposta não corresponde à mensagem sobre {summary}. \
                Por favor, responda com uma das opções:\n{options}"
                .to_string(),
            ambiguity: "Você tem {count} mensagens aguardando resposta:\n{items}\n\
                Vamos responder uma de cada vez. Vou reenviar a primeira delas."
                .to_string(),
            confirm_prompt: "Entendi que você quis dizer: \"{label}\". \
                Se estiver correto, responda {number}."
                .to_string(),
            generic_clarification: "Não entendi sua resposta. Por favor, responda com o número \
                de uma das opções:\n{options}"
                .to_string(),
            ack_confirmed: "Presença confirmada! Obrigado. Até a sua consulta.".to_string(),
            ack_declined: "Entendido. Vamos desmarcar sua consulta e liberar a vaga para outro \
                paciente. Obrigado por avisar."
                .to_string(),
            ack_not_scheduled: "Obrigado por avisar. Vamos verificar o agendamento.".to_string(),
            ack_wants_reschedule: "Certo! Seu pedido de reagendamento foi registrado. \
                Avisaremos assim que houver uma nova data."
                .to_string(),
            ack_patient_initiated_cancel: "Obrigado pela informação. O cancelamento foi registrado \
                como solicitado por você."
                .to_string(),
            ack_no_reschedule_wanted: "Entendido. Não faremos o reagendamento desta consulta."
                .to_string(),
            confirmation_request: "Olá, {name}! Você tem consulta de {specialty} em {date}. \
                Você poderá comparecer?"
                .to_string(),
            cancellation_notice: "Olá, {name}. Sua consulta de {specialty} de {date} foi \
                desmarcada. O que você deseja fazer?"
                .to_string(),
            new_date_confirmation: "Olá, {name}! Sua consulta de {specialty} foi reagendada \
                para {date}. Você poderá comparecer?"
                .to_string(),
            summary: "{specialty} em {date}".to_string(),
        }
    }
}

impl ReplyTemplates {
    /// Load templates from `REPLY_TEMPLATES_FILE`, falling back to defaults.
    pub fn load() -> Self {
        let Ok(path) = std::env::var("REPLY_TEMPLATES_FILE") else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(templates) => {
                    info!("Loaded reply templates from {}", path);
                    templates
                }
                Err(e) => {
                    warn!("Invalid reply templates in {}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn format_date(&self, at: DateTime<Utc>) -> String {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or(Utc.fix());
        at.with_timezone(&offset).format("%d/%m/%Y às %H:%M").to_string()
    }

    pub fn summary(&self, specialty: &str, at: DateTime<Utc>) -> String {
        render(
            &self.summary,
            &[("specialty", specialty), ("date", &self.format_date(at))],
        )
    }

    /// Short label shown to the patient for an intent.
    pub fn intent_label(&self, intent: Intent) -> &'static str {
        match intent {
            Intent::Confirmed => "Confirmo minha presença",
            Intent::Declined => "Não poderei comparecer",
            Intent::NotScheduled => "Não agendei esta consulta",
            Intent::WantsReschedule => "Quero reagendar",
            Intent::PatientInitiatedCancel => "Eu pedi o cancelamento",
            Intent::NoRescheduleWanted => "Não preciso reagendar",
            Intent::HumanAgent => "Falar com um atendente",
            Intent::FreeTalk | Intent::Unknown => "Outro assunto",
        }
    }

    /// Quick-reply buttons for a flow; ids are the option numbers.
    pub fn buttons(&self, flow: FlowType) -> Vec<ReplyButton> {
        let titles: [&str; 3] = match flow {
            FlowType::Confirmation => ["Confirmo", "Não poderei ir", "Não agendei"],
            FlowType::Cancellation => ["Quero reagendar", "Eu pedi", "Não reagendar"],
        };
        titles
            .iter()
            .enumerate()
            .map(|(i, title)| ReplyButton::new((i + 1).to_string(), *title))
            .collect()
    }

    /// Numbered option list for a flow, one option per line.
    pub fn options(&self, flow: FlowType) -> String {
        flow.intents()
            .iter()
            .enumerate()
            .map(|(i, intent)| format!("{} - {}", i + 1, self.intent_label(*intent)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn acknowledgement(&self, intent: Intent) -> Option<&str> {
        match intent {
            Intent::Confirmed => Some(&self.ack_confirmed),
            Intent::Declined => Some(&self.ack_declined),
            Intent::NotScheduled => Some(&self.ack_not_scheduled),
            Intent::WantsReschedule => Some(&self.ack_wants_reschedule),
            Intent::PatientInitiatedCancel => Some(&self.ack_patient_initiated_cancel),
            Intent::NoRescheduleWanted => Some(&self.ack_no_reschedule_wanted),
            Intent::HumanAgent | Intent::FreeTalk | Intent::Unknown => None,
        }
    }

    pub fn confirm_prompt(&self, intent: Intent, flow: FlowType) -> String {
        let number = flow
            .option_number(intent)
            .map(|n| n.to_string())
            .unwrap_or_default();
        render(
            &self.confirm_prompt,
            &[("label", self.intent_label(intent)), ("number", &number)],
        )
    }

    pub fn generic_clarification(&self, flow: FlowType) -> String {
        render(&self.generic_clarification, &[("options", &self.options(flow))])
    }

    pub fn incompatible_intent(&self, summary: &str, flow: FlowType) -> String {
        render(
            &self.incompatible_intent,
            &[("summary", summary), ("options", &self.options(flow))],
        )
    }

    pub fn ambiguity<'a>(&self, summaries: impl IntoIterator<Item = &'a str>) -> String {
        let items: Vec<String> = summaries
            .into_iter()
            .enumerate()
            .map(|(i, summary)| format!("{}. {}", i + 1, summary))
            .collect();
        render(
            &self.ambiguity,
            &[("count", &items.len().to_string()), ("items", &items.join("\n"))],
        )
    }

    fn appointment_text(&self, template: &str, name: &str, specialty: &str, at: DateTime<Utc>) -> String {
        render(
            template,
            &[
                ("name", name),
                ("specialty", specialty),
                ("date", &self.format_date(at)),
            ],
        )
    }

    pub fn confirmation_request(&self, name: &str, specialty: &str, at: DateTime<Utc>) -> String {
        self.appointment_text(&self.confirmation_request, name, specialty, at)
    }

    pub fn cancellation_notice(&self, name: &str, specialty: &str, at: DateTime<Utc>) -> String {
        self.appointment_text(&self.cancellation_notice, name, specialty, at)
    }

    pub fn new_date_confirmation(&self, name: &str, specialty: &str, at: DateTime<Utc>) -> String {
        self.appointment_text(&self.new_date_confirmation, name, specialty, at)
    }
}
