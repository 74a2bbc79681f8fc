/// Routing layer: destination resolution and the per-instance TCP service.
pub mod destination;
pub mod router;

use std::fmt;

/// Which class of backend a routing instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Declared access-mode names as they appear in configuration.
pub const ACCESS_MODE_NAMES: &[(&str, AccessMode)] = &[
    ("read-write", AccessMode::ReadWrite),
    ("read-only", AccessMode::ReadOnly),
];

impl AccessMode {
    /// Case-insensitive lookup against the declared names.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        ACCESS_MODE_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, mode)| *mode)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "read-write",
            AccessMode::ReadOnly => "read-only",
        }
    }

    pub fn valid_names() -> String {
        ACCESS_MODE_NAMES
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_are_case_insensitive() {
        assert_eq!(AccessMode::from_name("read-write"), Some(AccessMode::ReadWrite));
        assert_eq!(AccessMode::from_name("Read-Only"), Some(AccessMode::ReadOnly));
        assert_eq!(AccessMode::from_name("READ-WRITE"), Some(AccessMode::ReadWrite));
        assert_eq!(AccessMode::from_name("readwrite"), None);
        assert_eq!(AccessMode::from_name(""), None);
    }

    #[test]
    fn valid_names_lists_all_modes() {
        assert_eq!(AccessMode::valid_names(), "read-write, read-only");
    }

    #[test]
    fn display_matches_config_names() {
        assert_eq!(AccessMode::ReadWrite.to_string(), "read-write");
        assert_eq!(AccessMode::ReadOnly.to_string(), "read-only");
    }
}
