use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::error;

/// Name of the host's primary review label, used when no OWNERS file in the
/// hierarchy configures one.
pub const CODE_REVIEW: &str = "Code-Review";

static LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A([a-zA-Z0-9-]+)(?:\s*,\s*(-?\d+))?\z").expect("valid label pattern")
});

/// The approval label governing a set of paths, with an optional minimum
/// score an owner's vote must reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelDefinition {
    pub name: String,
    pub score: Option<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelParseError {
    #[error("label definition is empty")]
    Empty,
    #[error("invalid label definition: {0}")]
    Invalid(String),
}

impl LabelDefinition {
    pub fn new(name: impl Into<String>, score: Option<i16>) -> Self {
        LabelDefinition {
            name: name.into(),
            score,
        }
    }

    pub fn code_review() -> Self {
        LabelDefinition::new(CODE_REVIEW, None)
    }

    /// Parse a `Name` or `Name,Score` definition, logging and discarding
    /// invalid input. Blank input is `None` without a log entry.
    pub fn parse(definition: &str) -> Option<LabelDefinition> {
        match definition.parse() {
            Ok(label) => Some(label),
            Err(LabelParseError::Empty) => None,
            Err(err) => {
                error!(
                    "Parsing label definition [{}] has failed: {}",
                    definition, err
                );
                None
            }
        }
    }
}

impl FromStr for LabelDefinition {
    type Err = LabelParseError;

    fn from_str(definition: &str) -> Result<Self, Self::Err> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(LabelParseError::Empty);
        }

        let captures = LABEL_PATTERN
            .captures(definition)
            .ok_or_else(|| LabelParseError::Invalid(definition.to_owned()))?;
        let score = match captures.get(2) {
            Some(score) => Some(
                score
                    .as_str()
                    .parse::<i16>()
                    .map_err(|_| LabelParseError::Invalid(definition.to_owned()))?,
            ),
            None => None,
        };
        Ok(LabelDefinition::new(&captures[1], score))
    }
}

impl fmt::Display for LabelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.score {
            Some(score) => write!(f, "{},{}", self.name, score),
            None => write!(f, "{}", self.name),
        }
    }
}
