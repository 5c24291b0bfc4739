#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    SubmitImage,
    Export,
    Clear,
    History,
    Help,
    Quit,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: CommandAction,
}

pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image",
        action: CommandAction::SubmitImage,
    },
    CommandSpec {
        command: "upload",
        action: CommandAction::SubmitImage,
    },
    CommandSpec {
        command: "export",
        action: CommandAction::Export,
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        action: CommandAction::Clear,
    },
    CommandSpec {
        command: "history",
        action: CommandAction::History,
    },
    CommandSpec {
        command: "help",
        action: CommandAction::Help,
    },
    CommandSpec {
        command: "quit",
        action: CommandAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: CommandAction::Quit,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/image <path>",
    "/clear",
    "/history",
    "/export [path]",
    "/help",
    "/quit",
];
