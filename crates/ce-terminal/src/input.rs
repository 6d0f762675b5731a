//! Operator commands from stdin

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use ce_protocol::RequestId;

use crate::agent::{OperatorAction, TerminalHandle};
use crate::presence::OverrideSwitch;

/// A parsed stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Operator(OperatorAction),
    Override(bool),
}

/// Parse one line:
///
/// ```text
/// accept [request-id]
/// decline [reason...]
/// override on|off
/// ```
pub fn parse_command(line: &str) -> Result<InputCommand, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "accept" | "a" => {
            let id = if rest.is_empty() {
                None
            } else {
                Some(RequestId::parse(rest).ok_or_else(|| format!("not a request id: {}", rest))?)
            };
            Ok(InputCommand::Operator(OperatorAction::Accept { id }))
        }
        "decline" | "d" => Ok(InputCommand::Operator(OperatorAction::Decline {
            id: None,
            reason: (!rest.is_empty()).then(|| rest.to_string()),
        })),
        "override" => match rest {
            "on" => Ok(InputCommand::Override(true)),
            "off" => Ok(InputCommand::Override(false)),
            _ => Err("usage: override on|off".to_string()),
        },
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command: {}", other)),
    }
}

/// Read commands from stdin until EOF or cancellation
pub async fn run_stdin(handle: TerminalHandle, switch: OverrideSwitch, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match parse_command(&line) {
                Ok(InputCommand::Operator(action)) => {
                    if handle.send(action).is_err() {
                        break;
                    }
                }
                Ok(InputCommand::Override(enabled)) => switch.set(enabled),
                Err(e) => tracing::warn!("{}", e),
            },
            Ok(None) => {
                tracing::debug!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_variants() {
        assert_eq!(
            parse_command("accept"),
            Ok(InputCommand::Operator(OperatorAction::Accept { id: None }))
        );
        let id = RequestId::generate();
        assert_eq!(
            parse_command(&format!("a {}", id)),
            Ok(InputCommand::Operator(OperatorAction::Accept { id: Some(id) }))
        );
        assert!(parse_command("accept nonsense").is_err());
    }

    #[test]
    fn test_decline_reason() {
        assert_eq!(
            parse_command("decline  in a meeting "),
            Ok(InputCommand::Operator(OperatorAction::Decline {
                id: None,
                reason: Some("in a meeting".to_string()),
            }))
        );
        assert_eq!(
            parse_command("DECLINE"),
            Ok(InputCommand::Operator(OperatorAction::Decline {
                id: None,
                reason: None,
            }))
        );
    }

    #[test]
    fn test_override_and_unknown() {
        assert_eq!(parse_command("override on"), Ok(InputCommand::Override(true)));
        assert_eq!(parse_command("override off"), Ok(InputCommand::Override(false)));
        assert!(parse_command("override maybe").is_err());
        assert!(parse_command("reboot").is_err());
    }
}
