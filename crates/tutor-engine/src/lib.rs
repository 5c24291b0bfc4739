pub mod config;
pub mod media;
pub mod payload;
pub mod provider;
pub mod session;

pub use config::{ClientConfig, CompletionSettings, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL};
pub use media::{encode, EncodedImage, ImageUpload};
pub use payload::{build_messages, ProviderContent, ProviderMessage, ProviderRole};
pub use provider::{
    default_registry, CompletionError, CompletionErrorKind, CompletionProvider,
    CompletionProviderRegistry, CompletionRequest, CompletionResponse, DryrunProvider,
    OpenAiChatProvider,
};
pub use session::{
    PendingSubmission, Submission, SubmissionOutcome, SubmissionState, TutorSession,
};
