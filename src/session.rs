use crate::ai_sdk::{Message, Role};
use serde::Serialize;

/// Instructions wrapped around every user question: one reasoning pass, and
/// at most one search.
const PROMPT_TEMPLATE: &str = "Answer the following question after running through your reasoning process exactly once.

# Conditions
You may search for information at most once per question.

Q: ";

pub(crate) fn wrap_prompt(input: &str) -> String {
    format!("{PROMPT_TEMPLATE}{input}")
}

/// The conversation so far, resent in full on every model call.
///
/// Messages are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn append(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Wraps raw user input in the prompt template and appends it.
    pub(crate) fn append_user_input(&mut self, input: &str) -> &Message {
        self.append(Message::user_text(wrap_prompt(input)))
    }

    /// Text blocks of every message, in append order. Tool traffic and
    /// reasoning are not shown.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.messages.iter().flat_map(transcript_entries).collect()
    }
}

pub(crate) fn transcript_entries(message: &Message) -> impl Iterator<Item = TranscriptEntry> + '_ {
    message.texts().map(|text| TranscriptEntry {
        role: message.role,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::ContentBlock;
    use serde_json::json;

    fn sample_log() -> SessionLog {
        let mut log = SessionLog::new();
        log.append_user_input("what is rust?");
        log.append(Message::new(
            Role::Assistant,
            vec![
                ContentBlock::Text {
                    text: "Let me look.".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "web_search".to_string(),
                    input: json!({"query": "rust"}),
                },
            ],
        ));
        log.append(Message::tool_result(
            "toolu_1".to_string(),
            "{\"results\":[]}".to_string(),
        ));
        log.append(Message::new(
            Role::Assistant,
            vec![
                ContentBlock::Thinking {
                    thinking: "private".to_string(),
                    signature: "s".to_string(),
                },
                ContentBlock::Text {
                    text: "A language.".to_string(),
                },
            ],
        ));
        log
    }

    #[test]
    fn user_input_is_wrapped_in_template() {
        let mut log = SessionLog::new();
        log.append_user_input("why is the sky blue?");

        let message = log.messages().last().unwrap();
        assert_eq!(message.role, Role::User);
        let text = message.texts().next().unwrap();
        assert!(text.starts_with("Answer the following question"));
        assert!(text.contains("at most once"));
        assert!(text.ends_with("Q: why is the sky blue?"));
    }

    #[test]
    fn transcript_shows_only_text_in_order() {
        let log = sample_log();
        let transcript = log.transcript();

        let shown: Vec<_> = transcript
            .iter()
            .map(|e| (e.role, e.text.as_str()))
            .collect();
        assert_eq!(shown[1..], [
            (Role::Assistant, "Let me look."),
            (Role::Assistant, "A language."),
        ]);
        assert_eq!(shown[0].0, Role::User);
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn transcript_is_idempotent() {
        let log = sample_log();
        assert_eq!(log.transcript(), log.transcript());
        assert_eq!(log.len(), 4);
    }
}
