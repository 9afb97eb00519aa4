//! Isolating the newest user turn from a client-submitted message list.
//!
//! Clients may send everything they display. Only the last user-authored
//! message is forwarded; earlier turns already live in the memory store.

use crate::error::{RelayError, Result};
use crate::types::{ModelMessage, UiMessage, UiPart, UiRole};

/// One user-authored input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Client id of the message the turn came from (may be empty).
    pub message_id: String,
    pub text: String,
}

impl Turn {
    /// The turn as a model message, ready to hand to the agent.
    pub fn to_model_message(&self) -> ModelMessage {
        ModelMessage::user(self.text.clone())
    }
}

/// Select the last user message by position, scanning from the end.
///
/// Fails with [`RelayError::InvalidTurn`] if the list holds no user message.
pub fn extract_latest_user_turn(messages: &[UiMessage]) -> Result<Turn> {
    let message = messages
        .iter()
        .rev()
        .find(|m| m.role == UiRole::User)
        .ok_or_else(|| RelayError::InvalidTurn("No user message found".into()))?;

    Ok(Turn {
        message_id: message.id.clone(),
        text: turn_text(message),
    })
}

/// First text part, else the legacy `content` field, else empty.
fn turn_text(message: &UiMessage) -> String {
    message
        .parts
        .iter()
        .find_map(|part| match part {
            UiPart::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .or_else(|| message.content.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UiRole;

    fn assistant(id: &str, text: &str) -> UiMessage {
        let mut m = UiMessage::new(id, UiRole::Assistant);
        m.parts.push(UiPart::text(text));
        m
    }

    #[test]
    fn picks_last_user_message_across_interleaving() {
        let messages = vec![
            UiMessage::user("u1", "first"),
            assistant("a1", "reply"),
            UiMessage::user("u2", "second"),
            assistant("a2", "another"),
            UiMessage::new("t1", UiRole::Tool),
        ];
        let turn = extract_latest_user_turn(&messages).unwrap();
        assert_eq!(turn.message_id, "u2");
        assert_eq!(turn.text, "second");
    }

    #[test]
    fn no_user_message_is_invalid_turn() {
        let messages = vec![assistant("a1", "hi"), UiMessage::new("t", UiRole::Tool)];
        let err = extract_latest_user_turn(&messages).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTurn(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn empty_list_is_invalid_turn() {
        assert!(matches!(
            extract_latest_user_turn(&[]),
            Err(RelayError::InvalidTurn(_))
        ));
    }

    #[test]
    fn falls_back_to_legacy_content() {
        let mut message = UiMessage::new("u1", UiRole::User);
        message.content = Some("legacy".into());
        let turn = extract_latest_user_turn(&[message]).unwrap();
        assert_eq!(turn.text, "legacy");
    }

    #[test]
    fn first_text_part_is_used() {
        let mut message = UiMessage::new("u1", UiRole::User);
        message.parts.push(UiPart::StepStart);
        message.parts.push(UiPart::text("one"));
        message.parts.push(UiPart::text("two"));
        let turn = extract_latest_user_turn(&[message]).unwrap();
        assert_eq!(turn.text, "one");
    }
}
