use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::domain::{Criterion, InputField};
use super::provider::{ChatMessage, MessageRole};
use super::records::RecordAccessor;

pub const DEFAULT_RANKING_KEYWORD: &str = "FINAL_RANKING";

const DEFAULT_SYSTEM_PROMPT: &str = "You are screening applicants on behalf of a reviewer. \
Evaluate the applicant strictly against the stated criteria and explain your reasoning briefly. \
End your reply with a line of the form {keyword} = <score>, where <score> is a whole number \
from 1 (poor fit) to 5 (excellent fit).";

/// Active prompt configuration, normally loaded from the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub ranking_keyword: String,
    pub extra_instructions: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            ranking_keyword: DEFAULT_RANKING_KEYWORD.to_string(),
            extra_instructions: String::new(),
        }
    }
}

impl PromptTemplate {
    fn rendered_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.replace("{keyword}", &self.ranking_keyword);
        if !self.extra_instructions.trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(self.extra_instructions.trim());
        }
        prompt
    }
}

/// Criteria text commonly originates in rich-text cells; literal break tags
/// become newlines before the model sees them.
pub fn normalize_breaks(text: &str) -> String {
    text.replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n")
}

/// "Display Name: value" lines for every non-empty configured input field.
pub fn applicant_summary(record: &dyn RecordAccessor, input_fields: &[InputField]) -> String {
    let mut summary = String::new();
    for input in input_fields {
        let value = record.text_value(&input.field);
        if value.trim().is_empty() {
            continue;
        }
        writeln!(summary, "{}: {}", input.display_name, value.trim()).expect("write summary line");
    }
    summary
}

pub fn build_messages(
    template: &PromptTemplate,
    criterion: &Criterion,
    applicant_summary: &str,
) -> Vec<ChatMessage> {
    let user = format!(
        "Criteria:\n{}\n\nApplicant:\n{}",
        normalize_breaks(&criterion.prompt).trim(),
        applicant_summary.trim(),
    );
    vec![
        ChatMessage::system(template.rendered_system_prompt()),
        ChatMessage::user(user),
    ]
}

/// Ordered audit trail of the whole exchange, written to the logs field.
pub fn transcript(messages: &[ChatMessage], response: &str) -> String {
    let mut transcript = String::new();
    for message in messages {
        writeln!(transcript, "=== {} ===", message.role.label()).expect("write section header");
        writeln!(transcript, "{}\n", message.content.trim()).expect("write section body");
    }
    writeln!(transcript, "=== {} ===", MessageRole::Assistant.label())
        .expect("write section header");
    writeln!(transcript, "{}", response.trim()).expect("write section body");
    transcript
}
