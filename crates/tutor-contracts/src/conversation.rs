use serde::{Deserialize, Serialize};

/// Display caption stored ahead of every uploaded image.
pub const IMAGE_TURN_CAPTION: &str = "Here is an image of a math problem:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One unit of a turn's content. Serializes in the chat-completions part shape
/// (`{"type":"text",...}` / `{"type":"image_url",...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentBlock::Image {
            image_url: ImageUrl { url: url.into() },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Image { .. } => None,
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            ContentBlock::Image { image_url } => Some(image_url.url.as_str()),
            ContentBlock::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }

    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(ContentBlock::image_url)
    }

    pub fn has_image(&self) -> bool {
        self.image_urls().next().is_some()
    }
}

/// Per-session, append-only log of turns plus the duplicate-upload guard.
///
/// Turns are never edited or removed individually; `clear` is the only way
/// to shrink the history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStore {
    history: Vec<Turn>,
    last_image_fingerprint: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(history: Vec<Turn>, last_image_fingerprint: Option<String>) -> Self {
        Self {
            history,
            last_image_fingerprint,
        }
    }

    pub fn history(&self) -> &[Turn] {
        self.history.as_slice()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last_image_fingerprint(&self) -> Option<&str> {
        self.last_image_fingerprint.as_deref()
    }

    pub fn append_user_text(&mut self, text: impl Into<String>) -> &Turn {
        self.push(Turn {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        })
    }

    pub fn append_user_image(&mut self, url: impl Into<String>) -> &Turn {
        self.push(Turn {
            role: Role::User,
            content: vec![
                ContentBlock::text(IMAGE_TURN_CAPTION),
                ContentBlock::image(url),
            ],
        })
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) -> &Turn {
        self.push(Turn {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        })
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_image_fingerprint = None;
    }

    /// Records `fingerprint` as the latest accepted upload unless it matches
    /// the one already stored.
    pub fn try_accept_image(&mut self, fingerprint: &str) -> bool {
        if self.last_image_fingerprint.as_deref() == Some(fingerprint) {
            return false;
        }
        self.last_image_fingerprint = Some(fingerprint.to_string());
        true
    }

    fn push(&mut self, turn: Turn) -> &Turn {
        self.history.push(turn);
        &self.history[self.history.len() - 1]
    }
}
