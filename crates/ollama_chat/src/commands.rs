#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Save(Option<String>),
    Load(Option<String>),
    Export,
    Model(Option<String>),
    Image(Option<String>),
    Caps,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands: /help, /new, /save [name], /load [path], /export, \
/model [name], /image <path>, /caps, /quit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/new" | "/clear" => SlashCommand::New,
        "/save" => SlashCommand::Save(argument),
        "/load" => SlashCommand::Load(argument),
        "/export" => SlashCommand::Export,
        "/model" => SlashCommand::Model(argument),
        "/image" => SlashCommand::Image(argument),
        "/caps" => SlashCommand::Caps,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}
