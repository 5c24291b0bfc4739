use super::command_registry::{CommandAction, CommandSpec, NO_ARG_COMMANDS, PATH_COMMANDS};

/// One parsed line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Noop,
    SubmitText { text: String },
    SubmitImage { path: String },
    Export { path: Option<String> },
    Clear,
    History,
    Help,
    Quit,
    Unknown { command: String, arg: String },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<CommandAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts: Vec<String> = match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    parts.join(" ")
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 && slash_tail.starts_with(|ch: char| ch.is_ascii_alphabetic()) {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, PATH_COMMANDS) {
                let path = parse_single_path_arg(arg);
                return match action {
                    CommandAction::Export => Intent::Export {
                        path: Some(path).filter(|value| !value.is_empty()),
                    },
                    _ => Intent::SubmitImage { path },
                };
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return match action {
                    CommandAction::Clear => Intent::Clear,
                    CommandAction::History => Intent::History,
                    CommandAction::Help => Intent::Help,
                    _ => Intent::Quit,
                };
            }

            return Intent::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    // A bare "/" or "/2 ..." is a math problem, not a command.
    Intent::SubmitText {
        text: raw_trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_intent, Intent};

    #[test]
    fn blank_lines_are_noop() {
        assert_eq!(parse_intent(""), Intent::Noop);
        assert_eq!(parse_intent("   \t"), Intent::Noop);
    }

    #[test]
    fn plain_text_is_submitted_trimmed() {
        assert_eq!(
            parse_intent("  solve x^2=4 \n"),
            Intent::SubmitText {
                text: "solve x^2=4".to_string()
            }
        );
        assert_eq!(
            parse_intent("/2 + 3"),
            Intent::SubmitText {
                text: "/2 + 3".to_string()
            }
        );
    }

    #[test]
    fn image_command_accepts_quoted_paths() {
        assert_eq!(
            parse_intent("/image \"/tmp/my problem.png\""),
            Intent::SubmitImage {
                path: "/tmp/my problem.png".to_string()
            }
        );
        assert_eq!(
            parse_intent("/upload shot.jpg"),
            Intent::SubmitImage {
                path: "shot.jpg".to_string()
            }
        );
        assert_eq!(
            parse_intent("/image"),
            Intent::SubmitImage {
                path: String::new()
            }
        );
    }

    #[test]
    fn export_path_is_optional() {
        assert_eq!(parse_intent("/export"), Intent::Export { path: None });
        assert_eq!(
            parse_intent("/export out/session.json"),
            Intent::Export {
                path: Some("out/session.json".to_string())
            }
        );
    }

    #[test]
    fn no_arg_commands_are_case_insensitive() {
        assert_eq!(parse_intent("/clear"), Intent::Clear);
        assert_eq!(parse_intent("/CLEAR"), Intent::Clear);
        assert_eq!(parse_intent("/history"), Intent::History);
        assert_eq!(parse_intent("/help"), Intent::Help);
        assert_eq!(parse_intent("/quit"), Intent::Quit);
        assert_eq!(parse_intent("/exit"), Intent::Quit);
    }

    #[test]
    fn unknown_command_keeps_argument() {
        assert_eq!(
            parse_intent("/magic foo bar"),
            Intent::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }
}
