//! AT command vocabulary and reply parsing.
//!
//! The modem is driven with a small fixed set of Hayes AT commands. Each
//! command is written verbatim followed by CR LF; the modem (configured for
//! echo + verbose result codes) repeats the command and then produces one
//! reply line.

use std::fmt;

use regex::Regex;

use super::error::ModemError;

/// The fixed set of command templates the daemon issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ATZ` - reset to stored profile.
    Reset,
    /// `ATI<n>` - read identity/info string n.
    Info(u8),
    /// `ATL<n>` - speaker volume.
    Volume(u8),
    /// `AT+FCLASS=?` - list supported fax service classes.
    FaxClasses,
    /// `AT+FCLASS?` - read the current fax class.
    FaxClass,
    /// `AT+FCLASS=<class>` - set the fax class.
    SetFaxClass(FaxClass),
    /// `AT+VCID=?` - list supported caller-ID modes.
    CallerIdModes,
    /// `AT+VCID?` - read the current caller-ID mode.
    CallerIdMode,
    /// `AT+VCID=<mode>` - set the caller-ID mode.
    SetCallerIdMode(CallerIdMode),
    /// `ATA` - answer the line.
    Answer,
    /// `ATH0` - hang up.
    Hangup,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Reset => write!(f, "ATZ"),
            Command::Info(n) => write!(f, "ATI{n}"),
            Command::Volume(n) => write!(f, "ATL{n}"),
            Command::FaxClasses => write!(f, "AT+FCLASS=?"),
            Command::FaxClass => write!(f, "AT+FCLASS?"),
            Command::SetFaxClass(fc) => write!(f, "AT+FCLASS={fc}"),
            Command::CallerIdModes => write!(f, "AT+VCID=?"),
            Command::CallerIdMode => write!(f, "AT+VCID?"),
            Command::SetCallerIdMode(mode) => write!(f, "AT+VCID={mode}"),
            Command::Answer => write!(f, "ATA"),
            Command::Hangup => write!(f, "ATH0"),
        }
    }
}

/// Fax service class as reported by `AT+FCLASS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaxClass {
    /// Data mode.
    Class0,
    /// Service class 1.
    Class1,
    /// Service class 1.0.
    Class1_0,
    /// Service class 2.
    Class2,
    /// Voice mode.
    Class8,
}

impl FaxClass {
    /// Parse a fax class token from a modem reply.
    pub fn parse(s: &str) -> Result<Self, ModemError> {
        match s {
            "0" => Ok(FaxClass::Class0),
            "1" => Ok(FaxClass::Class1),
            "1.0" => Ok(FaxClass::Class1_0),
            "2" => Ok(FaxClass::Class2),
            "8" => Ok(FaxClass::Class8),
            _ => Err(ModemError::UnparseableReply {
                reply: s.to_string(),
                detail: "unrecognized fax class".to_string(),
            }),
        }
    }
}

impl fmt::Display for FaxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaxClass::Class0 => "0",
            FaxClass::Class1 => "1",
            FaxClass::Class1_0 => "1.0",
            FaxClass::Class2 => "2",
            FaxClass::Class8 => "8",
        };
        f.write_str(s)
    }
}

/// Caller-ID presentation mode as used with `AT+VCID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerIdMode {
    /// Caller-ID reporting disabled.
    Off,
    /// Formatted caller-ID reporting (NAME/NMBR/DATE/TIME lines).
    On,
    /// Unformatted (raw) caller-ID reporting.
    Unformatted,
}

impl CallerIdMode {
    /// Parse a caller-ID mode token from a modem reply.
    pub fn parse(s: &str) -> Result<Self, ModemError> {
        match s {
            "0" => Ok(CallerIdMode::Off),
            "1" => Ok(CallerIdMode::On),
            "2" => Ok(CallerIdMode::Unformatted),
            _ => Err(ModemError::UnparseableReply {
                reply: s.to_string(),
                detail: "unrecognized caller ID mode".to_string(),
            }),
        }
    }
}

impl fmt::Display for CallerIdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallerIdMode::Off => "0",
            CallerIdMode::On => "1",
            CallerIdMode::Unformatted => "2",
        };
        f.write_str(s)
    }
}

/// Parse an `AT+VCID=?` reply of the form `(lo-hi)` into the inclusive set
/// of supported modes.
pub fn parse_mode_range(reply: &str) -> Result<Vec<CallerIdMode>, ModemError> {
    // The range pattern is fixed; a compile failure here would be a typo in
    // this file, caught by the tests below.
    let re = Regex::new(r"([0-9]+)-([0-9]+)").map_err(|e| ModemError::UnparseableReply {
        reply: reply.to_string(),
        detail: e.to_string(),
    })?;

    let caps = re
        .captures(reply)
        .ok_or_else(|| ModemError::UnparseableReply {
            reply: reply.to_string(),
            detail: "expected a (lo-hi) range".to_string(),
        })?;

    let bound = |i: usize| -> Result<u8, ModemError> {
        caps[i].parse().map_err(|_| ModemError::UnparseableReply {
            reply: reply.to_string(),
            detail: "range bound is not a small integer".to_string(),
        })
    };
    let (lo, hi) = (bound(1)?, bound(2)?);

    let mut modes = Vec::new();
    for n in lo..=hi {
        modes.push(CallerIdMode::parse(&n.to_string())?);
    }
    Ok(modes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_text() {
        assert_eq!(Command::Reset.to_string(), "ATZ");
        assert_eq!(Command::Info(3).to_string(), "ATI3");
        assert_eq!(Command::Volume(2).to_string(), "ATL2");
        assert_eq!(Command::FaxClasses.to_string(), "AT+FCLASS=?");
        assert_eq!(
            Command::SetFaxClass(FaxClass::Class1_0).to_string(),
            "AT+FCLASS=1.0"
        );
        assert_eq!(
            Command::SetCallerIdMode(CallerIdMode::On).to_string(),
            "AT+VCID=1"
        );
        assert_eq!(Command::Answer.to_string(), "ATA");
        assert_eq!(Command::Hangup.to_string(), "ATH0");
    }

    #[test]
    fn test_fax_class_round_trip() {
        for s in ["0", "1", "1.0", "2", "8"] {
            assert_eq!(FaxClass::parse(s).unwrap().to_string(), s);
        }
        assert!(FaxClass::parse("3").is_err());
    }

    #[test]
    fn test_caller_id_mode_round_trip() {
        for s in ["0", "1", "2"] {
            assert_eq!(CallerIdMode::parse(s).unwrap().to_string(), s);
        }
        assert!(CallerIdMode::parse("9").is_err());
    }

    #[test]
    fn test_parse_mode_range() {
        assert_eq!(
            parse_mode_range("(0-2)").unwrap(),
            vec![
                CallerIdMode::Off,
                CallerIdMode::On,
                CallerIdMode::Unformatted
            ]
        );
        assert_eq!(
            parse_mode_range("(1-2)").unwrap(),
            vec![CallerIdMode::On, CallerIdMode::Unformatted]
        );
    }

    #[test]
    fn test_parse_mode_range_rejects_garbage() {
        assert!(parse_mode_range("OK").is_err());
        // A range that includes an unknown mode is rejected too.
        assert!(parse_mode_range("(0-5)").is_err());
    }
}
