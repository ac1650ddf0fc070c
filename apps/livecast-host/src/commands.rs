//! Stdin line protocol.
//!
//! Each line is a JSON object: either a host command such as
//! `{"command":"start"}` or a signaling message from a viewer.

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;

use livecast_ipc::{CropRegion, EngineCommand, SignalMessage};

/// Commands typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum HostCommand {
    Start,
    ConfirmCrop { region: CropRegion },
    SkipCrop,
    Stop,
    Status,
    Quit,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum HostInput {
    Command(HostCommand),
    Signal(SignalMessage),
}

impl HostCommand {
    /// The engine command this maps to. `status` and `quit` are handled by
    /// the host itself.
    pub fn to_engine(&self) -> Option<EngineCommand> {
        match self {
            Self::Start => Some(EngineCommand::StartCapture),
            Self::ConfirmCrop { region } => Some(EngineCommand::ConfirmCrop { region: *region }),
            Self::SkipCrop => Some(EngineCommand::SkipCrop),
            Self::Stop => Some(EngineCommand::Stop),
            Self::Status | Self::Quit => None,
        }
    }
}

/// Parse one line of input. Blank lines yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<HostInput>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).context("Input is not JSON")?;

    let input = if value.get("command").is_some() {
        HostInput::Command(serde_json::from_value(value).context("Unknown host command")?)
    } else if value.get("type").is_some() {
        HostInput::Signal(serde_json::from_value(value).context("Malformed signaling message")?)
    } else {
        bail!("Expected a \"command\" or \"type\" field");
    };

    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_line(r#"{"command":"start"}"#).unwrap(),
            Some(HostInput::Command(HostCommand::Start))
        );
        assert_eq!(
            parse_line(r#"{"command":"skip-crop"}"#).unwrap(),
            Some(HostInput::Command(HostCommand::SkipCrop))
        );
        assert_eq!(
            parse_line(r#" {"command":"quit"} "#).unwrap(),
            Some(HostInput::Command(HostCommand::Quit))
        );
    }

    #[test]
    fn test_parse_confirm_crop() {
        let input = parse_line(
            r#"{"command":"confirm-crop","region":{"x":10,"y":20,"width":300,"height":200,"enabled":true}}"#,
        )
        .unwrap();

        let Some(HostInput::Command(command)) = input else {
            panic!("expected a command, got {input:?}");
        };
        assert!(matches!(
            command.to_engine(),
            Some(EngineCommand::ConfirmCrop { region }) if region == CropRegion::new(10, 20, 300, 200)
        ));
    }

    #[test]
    fn test_parse_signal() {
        let input = parse_line(r#"{"type":"viewer-joined","viewerId":"v1"}"#).unwrap();
        assert_eq!(
            input,
            Some(HostInput::Signal(SignalMessage::ViewerJoined {
                viewer_id: "v1".to_string()
            }))
        );
    }

    #[test]
    fn test_blank_and_bad_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"command":"dance"}"#).is_err());
        assert!(parse_line(r#"{"viewerId":"v1"}"#).is_err());
    }

    #[test]
    fn test_host_only_commands() {
        assert_eq!(HostCommand::Status.to_engine().map(|_| ()), None);
        assert_eq!(HostCommand::Quit.to_engine().map(|_| ()), None);
        assert!(matches!(
            HostCommand::Stop.to_engine(),
            Some(EngineCommand::Stop)
        ));
    }
}
