//! The command parser: tokenizes a line into `(verb, args)` and validates
//! the verb alphabet and arity. State-dependent validity (whether a
//! syntactically valid command is allowed right now) is the session state
//! machine's job, not this module's.

use crate::error::Error;
use crate::proto::{Command, Request};

/// Parse one already-CRLF-stripped command line.
///
/// `utf8_enabled` gates whether non-ASCII bytes are tolerated in arguments
/// (RFC 6856): before `UTF8` is issued, any byte >= 0x80 is a syntax error.
pub fn parse(line: &[u8], utf8_enabled: bool) -> Result<Request, Error> {
    if !utf8_enabled && line.iter().any(|&b| b >= 0x80) {
        return Err(Error::ProtocolSyntax);
    }

    let text = std::str::from_utf8(line).map_err(|_| Error::ProtocolSyntax)?;
    let tokens: Vec<&str> = text.split(' ').filter(|s| !s.is_empty()).collect();
    let verb = tokens.first().ok_or(Error::ProtocolSyntax)?;

    if verb.len() < 3 || verb.len() > 4 || !verb.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::ProtocolSyntax);
    }

    let cmd: Command = verb.parse().map_err(|_| Error::ProtocolSyntax)?;
    let args = &tokens[1..];

    let request = match cmd {
        Command::USER => Request::User(one_arg(args)?.to_string()),
        Command::PASS => Request::Pass(one_arg(args)?.to_string()),
        Command::STAT => {
            no_args(args)?;
            Request::Stat
        }
        Command::NOOP => {
            no_args(args)?;
            Request::Noop
        }
        Command::RSET => {
            no_args(args)?;
            Request::Rset
        }
        Command::QUIT => {
            no_args(args)?;
            Request::Quit
        }
        Command::CAPA => {
            no_args(args)?;
            Request::Capa
        }
        Command::STLS => {
            no_args(args)?;
            Request::Stls
        }
        Command::UTF8 => {
            no_args(args)?;
            Request::Utf8
        }
        Command::XPRO => {
            no_args(args)?;
            Request::Xpro
        }
        Command::LIST => Request::List(optional_number(args)?),
        Command::UIDL => Request::Uidl(optional_number(args)?),
        Command::RETR => Request::Retr(parse_number(one_arg(args)?)?),
        Command::DELE => Request::Dele(parse_number(one_arg(args)?)?),
        Command::TOP => {
            if args.len() != 2 {
                return Err(Error::ProtocolSyntax);
            }
            Request::Top {
                id: parse_number(args[0])?,
                lines: parse_number(args[1])?,
            }
        }
        Command::APOP => {
            if args.len() != 2 {
                return Err(Error::ProtocolSyntax);
            }
            Request::Apop {
                username: args[0].to_string(),
                digest: args[1].to_string(),
            }
        }
        Command::AUTH => match args.len() {
            0 => Request::Auth(None),
            1 => Request::Auth(Some(args[0].to_string())),
            _ => return Err(Error::ProtocolSyntax),
        },
    };

    Ok(request)
}

fn one_arg<'a>(args: &[&'a str]) -> Result<&'a str, Error> {
    match args {
        [only] => Ok(only),
        _ => Err(Error::ProtocolSyntax),
    }
}

fn no_args(args: &[&str]) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::ProtocolSyntax)
    }
}

fn optional_number(args: &[&str]) -> Result<Option<usize>, Error> {
    match args {
        [] => Ok(None),
        [only] => Ok(Some(parse_number(only)?)),
        _ => Err(Error::ProtocolSyntax),
    }
}

/// Numeric arguments parse as unsigned decimal with no leading sign
/// (rejects "+1", "-1"; leading zeros are accepted since they are still
/// plain unsigned decimal digits).
fn parse_number(s: &str) -> Result<usize, Error> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ProtocolSyntax);
    }
    s.parse().map_err(|_| Error::ProtocolSyntax)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_verbs() {
        assert!(matches!(parse(b"NOOP", true), Ok(Request::Noop)));
        assert!(matches!(parse(b"noop", true), Ok(Request::Noop)));
        assert!(matches!(parse(b"QUIT", true), Ok(Request::Quit)));
    }

    #[test]
    fn parses_arguments() {
        match parse(b"USER alice", true).unwrap() {
            Request::User(u) => assert_eq!(u, "alice"),
            other => panic!("unexpected {:?}", other),
        }
        match parse(b"TOP 3 10", true).unwrap() {
            Request::Top { id, lines } => {
                assert_eq!(id, 3);
                assert_eq!(lines, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(matches!(parse(b"FROB", true), Err(Error::ProtocolSyntax)));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(matches!(parse(b"STAT 1", true), Err(Error::ProtocolSyntax)));
        assert!(matches!(parse(b"USER", true), Err(Error::ProtocolSyntax)));
        assert!(matches!(parse(b"USER a b", true), Err(Error::ProtocolSyntax)));
    }

    #[test]
    fn rejects_signed_numbers() {
        assert!(matches!(parse(b"DELE +1", true), Err(Error::ProtocolSyntax)));
        assert!(matches!(parse(b"DELE -1", true), Err(Error::ProtocolSyntax)));
    }

    #[test]
    fn rejects_non_ascii_before_utf8() {
        assert!(matches!(
            parse("USER caf\u{e9}".as_bytes(), false),
            Err(Error::ProtocolSyntax)
        ));
        assert!(parse("USER caf\u{e9}".as_bytes(), true).is_ok());
    }

    #[test]
    fn empty_line_is_syntax_error() {
        assert!(matches!(parse(b"", true), Err(Error::ProtocolSyntax)));
    }

    #[test]
    fn list_and_uidl_accept_optional_argument() {
        assert!(matches!(parse(b"LIST", true), Ok(Request::List(None))));
        assert!(matches!(parse(b"LIST 2", true), Ok(Request::List(Some(2)))));
        assert!(matches!(parse(b"UIDL", true), Ok(Request::Uidl(None))));
    }
}
