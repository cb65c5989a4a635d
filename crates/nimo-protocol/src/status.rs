//! Status notifications: fire-and-forget text datagrams describing
//! registry changes.
//!
//! Wire text is `kind<TAB>field<TAB>field...`. Tabs inside fields are
//! replaced with spaces so the split is unambiguous.

use std::fmt;

/// Field separator on the wire.
pub const STATUS_SEPARATOR: char = '\t';

/// Largest datagram a status listener needs to accept.
pub const MAX_STATUS_DATAGRAM: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    RegistryLaunched,
    RegistryStopping,
    MachineAdded,
    NodeAdded,
    NodeRemoved,
    ChannelAdded,
    ChannelRemoved,
    ConnectionAdded,
    ConnectionRemoved,
    ApplicationAdded,
}

impl StatusKind {
    pub const ALL: [StatusKind; 10] = [
        Self::RegistryLaunched,
        Self::RegistryStopping,
        Self::MachineAdded,
        Self::NodeAdded,
        Self::NodeRemoved,
        Self::ChannelAdded,
        Self::ChannelRemoved,
        Self::ConnectionAdded,
        Self::ConnectionRemoved,
        Self::ApplicationAdded,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegistryLaunched => "registryLaunched",
            Self::RegistryStopping => "registryStopping",
            Self::MachineAdded => "machineAdded",
            Self::NodeAdded => "nodeAdded",
            Self::NodeRemoved => "nodeRemoved",
            Self::ChannelAdded => "channelAdded",
            Self::ChannelRemoved => "channelRemoved",
            Self::ConnectionAdded => "connectionAdded",
            Self::ConnectionRemoved => "connectionRemoved",
            Self::ApplicationAdded => "applicationAdded",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == text)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotification {
    pub kind: StatusKind,
    pub fields: Vec<String>,
}

impl StatusNotification {
    pub fn new<I, F>(kind: StatusKind, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            kind,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_wire(&self) -> String {
        let mut text = String::from(self.kind.as_str());
        for field in &self.fields {
            text.push(STATUS_SEPARATOR);
            text.extend(field.chars().map(|c| if c == STATUS_SEPARATOR { ' ' } else { c }));
        }
        text
    }

    /// `None` for an unknown kind.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim_end_matches(['\r', '\n']).split(STATUS_SEPARATOR);
        let kind = StatusKind::parse(parts.next()?)?;
        Some(Self {
            kind,
            fields: parts.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for StatusNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for field in &self.fields {
            write!(f, " {field}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_text() {
        let note = StatusNotification::new(StatusKind::ChannelAdded, ["camera", "/frames"]);
        assert_eq!(note.to_wire(), "channelAdded\tcamera\t/frames");
        assert_eq!(StatusNotification::parse(&note.to_wire()), Some(note));
    }

    #[test]
    fn test_tabs_in_fields_are_flattened() {
        let note = StatusNotification::new(StatusKind::ApplicationAdded, ["l", "a\tb"]);
        let parsed = StatusNotification::parse(&note.to_wire()).unwrap();
        assert_eq!(parsed.fields, vec!["l".to_string(), "a b".to_string()]);
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(StatusNotification::parse("somethingElse\tx"), None);
        assert_eq!(
            StatusNotification::parse("registryStopping").map(|n| n.fields.len()),
            Some(0)
        );
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in StatusKind::ALL {
            assert_eq!(StatusKind::parse(kind.as_str()), Some(kind));
        }
    }
}
