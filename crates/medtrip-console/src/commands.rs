use uuid::Uuid;

pub const HELP: &str = "\
commands:
  <text>              send a message
  /as patient|clinic  switch who you are speaking as
  /typing on|off      set your typing indicator
  /read               mark the other side's messages as read
  /book               request a booking for the demo treatment
  /bookings           list your bookings
  /pay <booking-id>   start checkout
  /paid <booking-id>  simulate a successful payment callback
  /failed <booking-id> simulate a failed payment callback
  /help               show this help
  /quit               exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Clinic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    As(Role),
    Typing(bool),
    Read,
    Book,
    Bookings,
    Pay(Uuid),
    Paid(Uuid),
    Failed(Uuid),
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let command = match (name, arg) {
            ("as", Some("patient")) => Self::As(Role::Patient),
            ("as", Some("clinic")) => Self::As(Role::Clinic),
            ("typing", Some("on")) => Self::Typing(true),
            ("typing", Some("off")) => Self::Typing(false),
            ("read", None) => Self::Read,
            ("book", None) => Self::Book,
            ("bookings", None) => Self::Bookings,
            ("pay", Some(id)) => Self::Pay(booking_id(id)?),
            ("paid", Some(id)) => Self::Paid(booking_id(id)?),
            ("failed", Some(id)) => Self::Failed(booking_id(id)?),
            ("help", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            _ => return Err(format!("unknown command: /{}", rest)),
        };
        Ok(Some(command))
    }
}

fn booking_id(raw: &str) -> Result<Uuid, String> {
    raw.parse()
        .map_err(|_| format!("not a booking id: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Some(Command::Say("hello there".into())))
        );
        assert_eq!(Command::parse("   "), Ok(None));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(Command::parse("/as clinic"), Ok(Some(Command::As(Role::Clinic))));
        assert_eq!(Command::parse("/typing off"), Ok(Some(Command::Typing(false))));
        assert_eq!(Command::parse("/quit"), Ok(Some(Command::Quit)));

        let id = Uuid::new_v4();
        assert_eq!(Command::parse(&format!("/pay {}", id)), Ok(Some(Command::Pay(id))));
    }

    #[test]
    fn bad_commands_are_reported() {
        assert!(Command::parse("/as doctor").is_err());
        assert!(Command::parse("/pay 42").unwrap_err().contains("not a booking id"));
        assert!(Command::parse("/dance").is_err());
    }
}
