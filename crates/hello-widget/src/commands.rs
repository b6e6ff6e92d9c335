//! Slash commands understood by the terminal client.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text for the bot.
    Say(String),
    /// `/id`: print the session id.
    Id,
    /// `/end`: end the session and exit.
    End,
    /// `/clear`: forget the session and history, then exit.
    Clear,
    /// `/logging on|off`
    Logging(bool),
    /// `/quit`
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Say(line.to_owned());
    };

    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("id"), None) => Input::Id,
        (Some("end"), None) => Input::End,
        (Some("clear"), None) => Input::Clear,
        (Some("quit" | "exit"), None) => Input::Quit,
        (Some("logging"), Some("on")) => Input::Logging(true),
        (Some("logging"), Some("off")) => Input::Logging(false),
        _ => Input::Unknown(line.to_owned()),
    }
}

pub const HELP: &str = "commands: /id  /end  /clear  /logging on|off  /quit";
