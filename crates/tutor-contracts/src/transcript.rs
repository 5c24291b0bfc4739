use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationStore, Turn};
use crate::events::now_utc_iso;

pub const TRANSCRIPT_SCHEMA_VERSION: u64 = 1;

/// Saved snapshot of one session's conversation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub schema_version: u64,
    pub session_id: String,
    pub exported_at: String,
    pub model: Option<String>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub last_image_fingerprint: Option<String>,
}

impl Transcript {
    pub fn from_store(
        store: &ConversationStore,
        session_id: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            schema_version: TRANSCRIPT_SCHEMA_VERSION,
            session_id: session_id.into(),
            exported_at: now_utc_iso(),
            model,
            turns: store.history().to_vec(),
            last_image_fingerprint: store.last_image_fingerprint().map(str::to_string),
        }
    }

    pub fn into_store(self) -> ConversationStore {
        ConversationStore::from_parts(self.turns, self.last_image_fingerprint)
    }
}

pub fn write_transcript(path: &Path, transcript: &Transcript) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(transcript)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_transcript(path: &Path) -> anyhow::Result<Transcript> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let transcript: Transcript = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid transcript", path.display()))?;
    if transcript.schema_version > TRANSCRIPT_SCHEMA_VERSION {
        bail!(
            "transcript schema {} is newer than supported ({})",
            transcript.schema_version,
            TRANSCRIPT_SCHEMA_VERSION
        );
    }
    Ok(transcript)
}
