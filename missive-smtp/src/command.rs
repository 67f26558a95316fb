use core::fmt::{self, Display, Formatter};
use std::collections::HashMap;

/// ESMTP parameters trailing a `MAIL FROM` command (RFC 5321 Section 3.3).
///
/// Keys are stored uppercased. Only `SIZE` is interpreted, the rest are kept
/// so they can be logged.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: HashMap<String, Option<String>>,
}

impl MailParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` and `FLAG` tokens separated by whitespace.
    ///
    /// A repeated key, or a `SIZE` that is not a positive number, is an error.
    pub fn from_params_str(params_str: &str) -> Result<Self, String> {
        let mut params = Self::new();

        for token in params_str.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.to_ascii_uppercase(), Some(value.to_string())),
                None => (token.to_ascii_uppercase(), None),
            };

            if params.params.contains_key(&key) {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }

            if key == "SIZE" {
                match value.as_deref().map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => {
                        return Err(format!(
                            "Invalid SIZE value: {}",
                            value.unwrap_or_default()
                        ));
                    }
                }
            }

            params.params.insert(key, value);
        }

        Ok(params)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.params
            .insert(key.to_ascii_uppercase(), Some(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_uppercase())?.as_deref()
    }

    /// The declared message size, if any.
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for MailParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = self.params.keys().collect::<Vec<_>>();
        keys.sort();

        for (idx, key) in keys.into_iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }

            match &self.params[key] {
                None => f.write_str(key)?,
                Some(value) => write!(f, "{key}={value}")?,
            }
        }

        Ok(())
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// `None` is the null reverse-path (`MAIL FROM:<>`).
    MailFrom(Option<String>, MailParameters),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    /// Recognised, but not something this server offers.
    Unsupported(String),
    Invalid(String),
}

impl Command {
    /// The argument carried by the command, if any.
    pub fn inner(&self) -> &str {
        match self {
            Self::Helo(HeloVariant::Ehlo(id) | HeloVariant::Helo(id)) => id,
            Self::MailFrom(from, _) => from.as_deref().unwrap_or_default(),
            Self::RcptTo(to) => to,
            Self::Unsupported(command) | Self::Invalid(command) => command,
            _ => "",
        }
    }

    pub fn size(&self) -> Option<usize> {
        match self {
            Self::MailFrom(_, params) => params.size(),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => write!(f, "{variant} {}", self.inner()),
            Self::MailFrom(_, params) if params.is_empty() => {
                write!(f, "MAIL FROM:<{}>", self.inner())
            }
            Self::MailFrom(_, params) => write!(f, "MAIL FROM:<{}> {params}", self.inner()),
            Self::RcptTo(to) => write!(f, "RCPT TO:<{to}>"),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Quit => f.write_str("QUIT"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Unsupported(command) | Self::Invalid(command) => f.write_str(command),
        }
    }
}

/// Parses a path argument such as `<user@example.com>` down to the bare
/// address. Anything but a single mailbox is refused.
fn path(argument: &str) -> Result<String, String> {
    let list = mailparse::addrparse(argument).map_err(|err| err.to_string())?;
    let info = list
        .extract_single_info()
        .ok_or_else(|| format!("Expected a single address in {argument}"))?;

    if info.addr.contains('@') {
        Ok(info.addr)
    } else {
        Err(format!("Invalid address {argument}"))
    }
}

fn starts_with_ignore_case(command: &str, prefix: &str) -> bool {
    command
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if starts_with_ignore_case(trimmed, "MAIL FROM:") {
            let rest = trimmed[10..].trim();
            if rest.is_empty() {
                return Err(Self::Invalid(command.trim_end().to_owned()));
            }

            let (addr, params) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));
            let params = MailParameters::from_params_str(params).map_err(Self::Invalid)?;

            if addr == "<>" {
                return Ok(Self::MailFrom(None, params));
            }

            path(addr).map_or_else(
                |err| Err(Self::Invalid(err)),
                |from| Ok(Self::MailFrom(Some(from), params)),
            )
        } else if starts_with_ignore_case(trimmed, "RCPT TO:") {
            let rest = trimmed[8..].trim();
            if rest.is_empty() {
                return Err(Self::Invalid(command.trim_end().to_owned()));
            }

            path(rest).map_or_else(|err| Err(Self::Invalid(err)), |to| Ok(Self::RcptTo(to)))
        } else if starts_with_ignore_case(trimmed, "EHLO") || starts_with_ignore_case(trimmed, "HELO")
        {
            match trimmed.split_once(' ') {
                None => Err(Self::Invalid(format!("Expected hostname in {trimmed}"))),
                Some((cmd, host)) if cmd.eq_ignore_ascii_case("HELO") => {
                    Ok(Self::Helo(HeloVariant::Helo(host.trim().to_string())))
                }
                Some((cmd, host)) if cmd.eq_ignore_ascii_case("EHLO") => {
                    Ok(Self::Helo(HeloVariant::Ehlo(host.trim().to_string())))
                }
                Some(_) => Err(Self::Invalid(trimmed.to_owned())),
            }
        } else if trimmed.eq_ignore_ascii_case("DATA") {
            Ok(Self::Data)
        } else if trimmed.eq_ignore_ascii_case("RSET") {
            Ok(Self::Rset)
        } else if starts_with_ignore_case(trimmed, "NOOP") {
            Ok(Self::Noop)
        } else if trimmed.eq_ignore_ascii_case("QUIT") {
            Ok(Self::Quit)
        } else if trimmed.eq_ignore_ascii_case("STARTTLS") {
            Ok(Self::StartTls)
        } else if ["AUTH", "HELP", "VRFY", "EXPN", "TURN"]
            .iter()
            .any(|verb| starts_with_ignore_case(trimmed, verb))
        {
            Ok(Self::Unsupported(trimmed.to_owned()))
        } else {
            Err(Self::Invalid(trimmed.to_owned()))
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

impl TryFrom<String> for Command {
    type Error = Self;

    fn try_from(command: String) -> Result<Self, Self::Error> {
        Self::try_from(command.as_str())
    }
}
