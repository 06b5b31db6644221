/// A command line as typed by the user and sent to the server. The wire format is the plain
///  text of the line; the command name is case-insensitive, arguments are whitespace-separated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Echo(String),
    Time,
    Ls,
    Cd(Option<String>),
    Quit,
    Upload(Option<String>),
    /// remote file name, and optionally a different local file name (client side only)
    Download(Option<String>, Option<String>),
    Unknown(String),
}

impl Command {
    /// Returns `None` for blank lines
    pub fn parse(line: &str) -> Option<Command> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?.to_lowercase();
        let args = parts.map(str::to_string).collect::<Vec<_>>();
        let mut args_iter = args.iter().cloned();

        let command = match name.as_str() {
            "echo" => Command::Echo(args.join(" ")),
            "time" => Command::Time,
            "ls" => Command::Ls,
            "cd" => Command::Cd(args_iter.next()),
            "quit" | "exit" | "close" => Command::Quit,
            "upload" => Command::Upload(args_iter.next()),
            "download" => Command::Download(args_iter.next(), args_iter.next()),
            _ => Command::Unknown(name),
        };
        Some(command)
    }

    /// Interprets a datagram as a command line. Datagrams that are not printable text (e.g. a
    ///  late acknowledgment from a finished transfer) are not commands.
    pub fn parse_datagram(datagram: &[u8]) -> Option<Command> {
        let line = std::str::from_utf8(datagram).ok()?;
        if line.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            return None;
        }
        Self::parse(line)
    }

    /// The line that is sent to the server for this command. The local target name of a
    ///  download stays on the client.
    pub fn to_wire(&self) -> String {
        fn with_arg(name: &str, arg: &Option<String>) -> String {
            match arg {
                Some(arg) => format!("{} {}", name, arg),
                None => name.to_string(),
            }
        }

        match self {
            Command::Echo(text) => format!("echo {}", text),
            Command::Time => "time".to_string(),
            Command::Ls => "ls".to_string(),
            Command::Cd(path) => with_arg("cd", path),
            Command::Quit => "quit".to_string(),
            Command::Upload(name) => with_arg("upload", name),
            Command::Download(name, _) => with_arg("download", name),
            Command::Unknown(name) => name.clone(),
        }
    }
}
