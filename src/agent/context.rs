//! Prompt assembly for a medical consultation turn.
//!
//! Message order is fixed: the doctor persona, replayed history, the global
//! summary note, the conversation summary note, the specialty note and
//! finally the new user turn.

use crate::session::{Content, Message, Role, Turn};

const GLOBAL_SUMMARY_HEADER: &str = "[GLOBAL SUMMARY]";
const SESSION_SUMMARY_HEADER: &str = "[SESSION SUMMARY]";

/// Builder for the message list sent to the model.
///
/// # Example
///
/// ```rust
/// use medchat::agent::ContextBuilder;
/// use medchat::session::{Content, Role};
///
/// let messages = ContextBuilder::new("شما یک پزشک هستید.")
///     .with_global_summary("بیمار سابقه میگرن دارد.")
///     .build(Content::from("سردرد دارم"));
/// assert_eq!(messages.len(), 3);
/// assert_eq!(messages[0].role, Role::System);
/// assert!(messages[1].content.text().starts_with("[GLOBAL SUMMARY]\n"));
/// assert_eq!(messages[2].role, Role::User);
/// ```
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    history: Vec<Message>,
    global_summary: Option<String>,
    session_summary: Option<String>,
    specialty_prompt: Option<String>,
}

impl ContextBuilder {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
            global_summary: None,
            session_summary: None,
            specialty_prompt: None,
        }
    }

    /// Replay stored turns as plain-text messages.
    ///
    /// Only user and assistant turns with text are kept; images from
    /// earlier turns are not resent.
    pub fn with_history(mut self, turns: &[Turn]) -> Self {
        self.history = turns
            .iter()
            .filter_map(|turn| {
                let text = turn.content.text();
                if text.is_empty() {
                    return None;
                }
                match turn.role {
                    Role::User => Some(Message::user(text)),
                    Role::Assistant => Some(Message::assistant(&text)),
                    Role::System | Role::Tool => None,
                }
            })
            .collect();
        self
    }

    pub fn with_global_summary(mut self, text: &str) -> Self {
        self.global_summary = non_blank(text);
        self
    }

    pub fn with_session_summary(mut self, text: &str) -> Self {
        self.session_summary = non_blank(text);
        self
    }

    pub fn with_specialty(mut self, prompt: &str) -> Self {
        self.specialty_prompt = non_blank(prompt);
        self
    }

    /// Build the full message list ending with `user_content`.
    pub fn build(&self, user_content: Content) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 5);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(self.history.iter().cloned());
        if let Some(ref text) = self.global_summary {
            messages.push(Message::system(&format!("{}\n{}", GLOBAL_SUMMARY_HEADER, text)));
        }
        if let Some(ref text) = self.session_summary {
            messages.push(Message::system(&format!("{}\n{}", SESSION_SUMMARY_HEADER, text)));
        }
        if let Some(ref prompt) = self.specialty_prompt {
            messages.push(Message::system(prompt));
        }
        messages.push(Message::user(user_content));
        messages
    }
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(id: u64, role: Role, content: Content) -> Turn {
        Turn {
            id,
            conversation_id: 1,
            user_id: 1,
            role,
            content,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_message_order() {
        let history = vec![
            turn(1, Role::User, Content::from("سلام")),
            turn(2, Role::Assistant, Content::from("سلام، چه کمکی از من برمی‌آید؟")),
        ];
        let messages = ContextBuilder::new("persona")
            .with_history(&history)
            .with_global_summary("سابقه آسم")
            .with_session_summary("سرفه خشک از دو روز پیش")
            .with_specialty("شما متخصص ریه هستید.")
            .build(Content::from("بدتر شده"));

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::System,
                Role::System,
                Role::System,
                Role::User
            ]
        );
        assert_eq!(messages[3].content.text(), "[GLOBAL SUMMARY]\nسابقه آسم");
        assert_eq!(messages[4].content.text(), "[SESSION SUMMARY]\nسرفه خشک از دو روز پیش");
        assert_eq!(messages[6].content.text(), "بدتر شده");
    }

    #[test]
    fn test_history_skips_empty_and_image_only_turns() {
        let history = vec![
            turn(
                1,
                Role::User,
                Content::Multipart(vec![crate::session::ContentPart::image_url("data:image/jpeg;base64,AA==")]),
            ),
            turn(2, Role::Assistant, Content::from("تصویر دریافت شد")),
        ];
        let messages = ContextBuilder::new("persona")
            .with_history(&history)
            .build(Content::from("؟"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_blank_notes_are_dropped() {
        let messages = ContextBuilder::new("persona")
            .with_global_summary("   ")
            .with_specialty("")
            .build(Content::from("سلام"));
        assert_eq!(messages.len(), 2);
    }
}
