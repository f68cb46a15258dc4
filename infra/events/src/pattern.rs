use std::fmt;

const WILDCARD: char = '*';

/// A subscription pattern: an exact key or a prefix ending in `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    Exact(String),
    /// Literal prefix with the trailing `*` stripped.
    Prefix(String),
}

impl Pattern {
    /// Parses a raw pattern. Only a single trailing `*` is treated as a wildcard.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.strip_suffix(WILDCARD)
            .map_or_else(|| Self::Exact(raw.to_owned()), |prefix| Self::Prefix(prefix.to_owned()))
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }

    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(exact) => f.write_str(exact),
            Self::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
        }
    }
}
