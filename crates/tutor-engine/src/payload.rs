use serde::Serialize;
use tutor_contracts::conversation::{ContentBlock, Role, Turn};

pub const SYSTEM_INSTRUCTIONS: &str = "You are a helpful AI Math Tutor. Provide a complete, step-by-step solution to the given math problems, including all intermediate calculations and the final answer. Format the steps using simple numbered lists (e.g., 1., 2., 3.). Use simple, plain text mathematical notation for expressions (e.g., '1/2' for fractions, 'x^2' for exponents, 'sqrt(x)' for square roots). Avoid using LaTeX commands like \\frac, \\boxed, or other complex formatting.";

pub const TEXT_INSTRUCTION_PREFIX: &str =
    "Please provide a complete, step-by-step solution to the following math problem: ";

pub const IMAGE_INSTRUCTION: &str =
    "Please provide a complete, step-by-step solution to the math problem shown in this image:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ProviderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProviderContent {
    Text(String),
    Parts(Vec<ContentBlock>),
}

/// One entry of the chat-completions `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: ProviderContent,
}

impl ProviderMessage {
    pub fn parts(&self) -> &[ContentBlock] {
        match &self.content {
            ProviderContent::Parts(parts) => parts.as_slice(),
            ProviderContent::Text(_) => &[],
        }
    }
}

/// Maps the conversation history to provider messages.
///
/// Output is always the system message followed by exactly one message per
/// turn, in history order.
pub fn build_messages(history: &[Turn]) -> Vec<ProviderMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ProviderMessage {
        role: ProviderRole::System,
        content: ProviderContent::Text(SYSTEM_INSTRUCTIONS.to_string()),
    });
    for turn in history {
        let content = match turn.role {
            Role::User => user_parts(turn),
            Role::Assistant => turn.content.clone(),
        };
        messages.push(ProviderMessage {
            role: turn.role.into(),
            content: ProviderContent::Parts(content),
        });
    }
    messages
}

// An image anywhere in the turn makes it an image request; the stored display
// caption is replaced by the image instruction. A user turn with neither text
// nor image becomes an empty parts array.
fn user_parts(turn: &Turn) -> Vec<ContentBlock> {
    if turn.has_image() {
        let mut parts = vec![ContentBlock::text(IMAGE_INSTRUCTION)];
        parts.extend(turn.image_urls().map(ContentBlock::image));
        return parts;
    }
    match turn.first_text() {
        Some(text) => vec![ContentBlock::text(format!("{TEXT_INSTRUCTION_PREFIX}{text}"))],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tutor_contracts::conversation::ConversationStore;

    use super::*;

    #[test]
    fn empty_history_yields_only_system_message() {
        let messages = build_messages(&[]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ProviderRole::System);
        assert_eq!(
            messages[0].content,
            ProviderContent::Text(SYSTEM_INSTRUCTIONS.to_string())
        );
    }

    #[test]
    fn system_instructions_forbid_heavy_markup() {
        assert!(SYSTEM_INSTRUCTIONS.contains("step-by-step"));
        assert!(SYSTEM_INSTRUCTIONS.contains("numbered lists"));
        assert!(SYSTEM_INSTRUCTIONS.contains("\\frac"));
        assert!(SYSTEM_INSTRUCTIONS.contains("\\boxed"));
    }

    #[test]
    fn user_text_is_prefixed_with_instruction() {
        let mut store = ConversationStore::new();
        store.append_user_text("2+2");
        let messages = build_messages(store.history());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ProviderRole::User);
        assert_eq!(
            messages[1].parts(),
            &[ContentBlock::text(
                "Please provide a complete, step-by-step solution to the following math problem: 2+2"
            )]
        );
    }

    #[test]
    fn user_image_emits_instruction_then_image() {
        let mut store = ConversationStore::new();
        store.append_user_image("data:image/png;base64,AAAA");
        let messages = build_messages(store.history());

        assert_eq!(
            messages[1].parts(),
            &[
                ContentBlock::text(IMAGE_INSTRUCTION),
                ContentBlock::image("data:image/png;base64,AAAA"),
            ]
        );
    }

    #[test]
    fn assistant_turns_pass_through_and_order_is_kept() {
        let mut store = ConversationStore::new();
        store.append_user_text("x+1=3");
        store.append_assistant("1. x = 2");
        store.append_user_text("x+1=3");
        store.append_assistant("1. x = 2");
        let messages = build_messages(store.history());

        assert_eq!(messages.len(), 1 + store.len());
        let roles: Vec<ProviderRole> = messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![
                ProviderRole::System,
                ProviderRole::User,
                ProviderRole::Assistant,
                ProviderRole::User,
                ProviderRole::Assistant,
            ]
        );
        assert_eq!(messages[2].parts(), store.history()[1].content.as_slice());
    }

    #[test]
    fn user_turn_without_text_or_image_is_empty() {
        let turn = Turn {
            role: Role::User,
            content: Vec::new(),
        };
        let messages = build_messages(&[turn]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, ProviderContent::Parts(Vec::new()));
    }

    #[test]
    fn serializes_to_chat_completions_shape() {
        let mut store = ConversationStore::new();
        store.append_user_image("data:image/png;base64,AAAA");
        store.append_assistant("1. Done");
        let value = serde_json::to_value(build_messages(store.history())).unwrap();

        assert_eq!(value[0]["role"], "system");
        assert!(value[0]["content"].is_string());
        assert_eq!(
            value[1],
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": IMAGE_INSTRUCTION},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                ],
            })
        );
        assert_eq!(
            value[2],
            json!({"role": "assistant", "content": [{"type": "text", "text": "1. Done"}]})
        );
    }
}
