pub const LINE_END: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub sender: String,
    pub channel: String,
    pub text: String,
    /// First field of the line as received, e.g. `:nick!user@host`.
    pub raw_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    Ping { token: String },
    AuthChallenge,
    AuthAccepted,
    ChannelMessage(ChannelMessage),
    Unrecognized,
}

/// Outbound commands the session knows how to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User { nick: String, realname: String },
    Nick { nick: String },
    Identify { secret: String },
    Join { channel: String },
    Part { channel: String },
    Pong { token: String },
    Privmsg { target: String, text: String },
}

/// Classify one inbound line. First match wins: PING, then a PRIVMSG with enough
/// fields, then the NickServ notices.
pub fn parse_line(line: &str) -> ProtocolEvent {
    if line.starts_with("PING") {
        return ProtocolEvent::Ping {
            token: line.chars().skip(5).collect(),
        };
    }

    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() > 3 && parts.contains(&"PRIVMSG") {
        let raw_prefix = parts[0].to_string();
        let nick_part = raw_prefix.split('!').next().unwrap_or("");
        let sender = nick_part.chars().skip(1).collect();
        let text = parts[3..].join(" ").chars().skip(1).collect();
        return ProtocolEvent::ChannelMessage(ChannelMessage {
            sender,
            channel: parts[2].to_string(),
            text,
            raw_prefix,
        });
    }

    if line.contains(":This nickname is registered") {
        return ProtocolEvent::AuthChallenge;
    }
    if line.contains(":Password accepted") || line.contains(":Your nickname is not registered") {
        return ProtocolEvent::AuthAccepted;
    }
    ProtocolEvent::Unrecognized
}

pub fn format_command(cmd: &Command) -> String {
    let body = match cmd {
        Command::User { nick, realname } => format!("USER {nick} {nick} {nick} :{realname}"),
        Command::Nick { nick } => format!("NICK {nick}"),
        Command::Identify { secret } => format!("NICKSERV IDENTIFY {secret}"),
        Command::Join { channel } => format!("JOIN {channel}"),
        Command::Part { channel } => format!("PART {channel}"),
        Command::Pong { token } => format!("PONG {token}"),
        Command::Privmsg { target, text } => format!("PRIVMSG {target} :{}", one_line(text)),
    };
    format!("{body}{LINE_END}")
}

/// Text for log output: strips the line terminator and hides the NickServ secret.
pub fn redact(raw: &str) -> String {
    let line = raw.trim_end_matches(['\r', '\n']);
    match line.strip_prefix("NICKSERV IDENTIFY ") {
        Some(_) => "NICKSERV IDENTIFY ****".to_string(),
        None => line.to_string(),
    }
}

fn one_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
