use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tutor_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use tutor_contracts::conversation::{ConversationStore, ContentBlock, Role};
use tutor_contracts::events::{new_session_id, EventWriter};
use tutor_contracts::transcript::load_transcript;
use tutor_engine::{
    default_registry, ClientConfig, CompletionProvider, CompletionProviderRegistry,
    CompletionSettings, ImageUpload, PendingSubmission, Submission, SubmissionOutcome,
    TutorSession, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL,
};

#[derive(Debug, Parser)]
#[command(
    name = "math-tutor",
    version,
    about = "Step-by-step math tutor backed by a chat-completion model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Solve(SolveArgs),
}

#[derive(Debug, Parser)]
struct ModelArgs {
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
    max_tokens: u64,
    #[arg(long, default_value = "openai")]
    provider: String,
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "tutor-session")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    resume: Option<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Debug, Parser)]
struct SolveArgs {
    #[arg(long, conflicts_with = "image", required_unless_present = "image")]
    text: Option<String>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "tutor-session")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
}

fn main() {
    dotenvy::dotenv().ok();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("math-tutor error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Solve(args) => run_solve(args),
    }
}

fn load_registry(model: &ModelArgs) -> Result<CompletionProviderRegistry> {
    let config = if model.provider == "dryrun" {
        None
    } else {
        Some(ClientConfig::from_env()?.with_timeout(Duration::from_secs(model.timeout_secs)))
    };
    default_registry(config.as_ref())
}

fn select_provider<'a>(
    registry: &'a CompletionProviderRegistry,
    model: &ModelArgs,
) -> Result<&'a dyn CompletionProvider> {
    registry.get(&model.provider).with_context(|| {
        format!(
            "unknown provider '{}' (available: {})",
            model.provider,
            registry.names().join(", ")
        )
    })
}

fn completion_settings(model: &ModelArgs) -> CompletionSettings {
    CompletionSettings {
        model: model.model.clone(),
        max_output_tokens: model.max_tokens.max(1),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let registry = load_registry(&args.model)?;
    let provider = select_provider(&registry, &args.model)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));

    let (store, session_id) = match args.resume.as_deref() {
        Some(path) => {
            let transcript = load_transcript(path)?;
            let session_id = transcript.session_id.clone();
            (transcript.into_store(), session_id)
        }
        None => (ConversationStore::new(), new_session_id()),
    };
    let mut session = TutorSession::resume(
        store,
        completion_settings(&args.model),
        EventWriter::new(&events_path, session_id),
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    chat_loop(
        &mut session,
        provider,
        &args.out,
        stdin.lock(),
        &mut stdout.lock(),
    )
}

fn chat_loop<R: BufRead, W: Write>(
    session: &mut TutorSession,
    provider: &dyn CompletionProvider,
    out_dir: &Path,
    mut input: R,
    output: &mut W,
) -> Result<()> {
    let mut line = String::new();

    writeln!(
        output,
        "Hello! I'm your AI Math Tutor. Type a problem, or /help for commands."
    )?;
    if !session.store().is_empty() {
        render_history(output, session.store())?;
    }

    loop {
        render_warnings(output, session)?;
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            // read_line has already consumed the offending bytes up to the newline.
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                writeln!(output, "Input was not valid UTF-8; line ignored.")?;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_intent(&line) {
            Intent::Noop => continue,
            Intent::Quit => break,
            Intent::Help => {
                writeln!(
                    output,
                    "Type a math problem to solve it, or use: {}",
                    CHAT_HELP_COMMANDS.join("  ")
                )?;
            }
            Intent::SubmitText { text } => {
                if let Submission::Pending(pending) = session.begin_text(&text)? {
                    answer(output, session, provider, pending)?;
                }
            }
            Intent::SubmitImage { path } => {
                if path.is_empty() {
                    writeln!(output, "/image requires a path")?;
                    continue;
                }
                let upload = match ImageUpload::from_path(Path::new(&path)) {
                    Ok(upload) => upload,
                    Err(err) => {
                        writeln!(output, "Upload failed: {err:#}")?;
                        continue;
                    }
                };
                match session.begin_image(&upload)? {
                    Submission::Pending(pending) => answer(output, session, provider, pending)?,
                    Submission::DuplicateImage => writeln!(
                        output,
                        "That image was already submitted. Upload a different one or /clear."
                    )?,
                    Submission::Empty => {
                        writeln!(output, "That image file is empty; nothing to submit.")?
                    }
                }
            }
            Intent::Clear => {
                session.clear()?;
                writeln!(output, "Chat cleared.")?;
            }
            Intent::History => {
                if session.store().is_empty() {
                    writeln!(output, "No messages yet.")?;
                } else {
                    render_history(output, session.store())?;
                }
            }
            Intent::Export { path } => {
                let path = path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| out_dir.join("transcript.json"));
                match session.export_transcript(&path) {
                    Ok(()) => writeln!(output, "Transcript written to {}", path.display())?,
                    Err(err) => writeln!(output, "Export failed: {err:#}")?,
                }
            }
            Intent::Unknown { command, .. } => {
                writeln!(output, "Unknown command /{command}. Type /help for commands.")?;
            }
        }
    }

    render_warnings(output, session)
}

fn render_warnings<W: Write>(output: &mut W, session: &mut TutorSession) -> Result<()> {
    for warning in session.take_warnings() {
        writeln!(output, "warning: {warning}")?;
    }
    Ok(())
}

fn answer<W: Write>(
    output: &mut W,
    session: &mut TutorSession,
    provider: &dyn CompletionProvider,
    pending: PendingSubmission,
) -> Result<()> {
    writeln!(output, "Thinking...")?;
    let result = provider.complete(pending.request());
    let outcome = session.finish(pending, result)?;
    render_outcome(output, &outcome)
}

fn render_outcome<W: Write>(output: &mut W, outcome: &SubmissionOutcome) -> Result<()> {
    match outcome {
        SubmissionOutcome::Answered(response) => {
            writeln!(output)?;
            writeln!(output, "{}: {}", role_label(Role::Assistant), response.text)?;
            writeln!(output)?;
        }
        SubmissionOutcome::Failed(err) => writeln!(output, "{err}")?,
        SubmissionOutcome::DuplicateImage | SubmissionOutcome::Empty => {}
    }
    Ok(())
}

fn render_history<W: Write>(output: &mut W, store: &ConversationStore) -> Result<()> {
    for turn in store.history() {
        let rendered = turn
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Image { image_url } => describe_image_url(&image_url.url),
            })
            .collect::<Vec<String>>()
            .join("\n  ");
        writeln!(output, "{}: {}", role_label(turn.role), rendered)?;
    }
    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Tutor",
    }
}

fn describe_image_url(url: &str) -> String {
    match url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        Some((mime, payload)) => format!("[image {mime}, {} bytes]", payload.len() / 4 * 3),
        None => format!("[image {url}]"),
    }
}

fn run_solve(args: SolveArgs) -> Result<i32> {
    let registry = load_registry(&args.model)?;
    let provider = select_provider(&registry, &args.model)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = TutorSession::new(
        completion_settings(&args.model),
        EventWriter::new(&events_path, new_session_id()),
    );

    let outcome = match (&args.text, &args.image) {
        (Some(text), _) => session.submit_text(provider, text)?,
        (None, Some(path)) => session.submit_image(provider, &ImageUpload::from_path(path)?)?,
        (None, None) => anyhow::bail!("solve requires --text or --image"),
    };
    for warning in session.take_warnings() {
        eprintln!("warning: {warning}");
    }

    match outcome {
        SubmissionOutcome::Answered(response) => {
            println!("{}", response.text);
            Ok(0)
        }
        SubmissionOutcome::Failed(err) => {
            eprintln!("{err}");
            Ok(1)
        }
        SubmissionOutcome::DuplicateImage | SubmissionOutcome::Empty => {
            eprintln!("Nothing to solve.");
            Ok(1)
        }
    }
}
