use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::{
    accounts::{strip_owner_domain, AccountId, IdentityResolver},
    label::LabelDefinition,
    matcher::{Matcher, Pattern, PatternKind},
};

/// Order in which the variant keys of a `matchers` entry are looked up. The
/// first key present decides the variant.
const MATCHER_KINDS: [PatternKind; 5] = [
    PatternKind::Suffix,
    PatternKind::Regex,
    PatternKind::PartialRegex,
    PatternKind::Exact,
    PatternKind::Generic,
];

/// The parsed form of one OWNERS file.
///
/// Owners and reviewers are kept as written; matcher owners are already
/// resolved to accounts, group members included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnersConfig {
    pub inherited: bool,
    pub owners: BTreeSet<String>,
    pub reviewers: BTreeSet<String>,
    pub matchers: BTreeMap<String, Matcher>,
    pub label: Option<LabelDefinition>,
}

impl Default for OwnersConfig {
    fn default() -> Self {
        OwnersConfig {
            inherited: true,
            owners: BTreeSet::new(),
            reviewers: BTreeSet::new(),
            matchers: BTreeMap::new(),
            label: None,
        }
    }
}

/// An OWNERS file that couldn't be parsed at all.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("expected a mapping at the top level of the OWNERS file")]
    NotAMapping,
}

/// Parses OWNERS files, resolving matcher owners through an
/// [`IdentityResolver`].
pub struct ConfigurationParser<'a> {
    accounts: &'a dyn IdentityResolver,
}

impl<'a> ConfigurationParser<'a> {
    pub fn new(accounts: &'a dyn IdentityResolver) -> Self {
        Self { accounts }
    }

    /// Parse the raw bytes of an OWNERS file. Invalid elements (a bad label,
    /// a matcher without a variant key or without owners) are logged and
    /// dropped; only a document that can't be read at all is an error.
    pub fn parse(&self, source: &[u8]) -> Result<OwnersConfig, ParseError> {
        if source.iter().all(u8::is_ascii_whitespace) {
            return Ok(OwnersConfig::default());
        }

        let document: Value = serde_yaml::from_slice(source)?;
        let root = match document {
            Value::Mapping(root) => root,
            Value::Null => return Ok(OwnersConfig::default()),
            _ => return Err(ParseError::NotAMapping),
        };

        let mut config = OwnersConfig {
            inherited: parse_inherited(root.get("inherited")),
            owners: text_list(root.get("owners"), "owners"),
            reviewers: text_list(root.get("reviewers"), "reviewers"),
            ..OwnersConfig::default()
        };

        if let Some(label) = root.get("label").and_then(scalar_text) {
            config.label = LabelDefinition::parse(&label);
        }

        match root.get("matchers") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(entries)) => {
                for entry in entries {
                    let Some(matcher) = self.parse_matcher(entry) else {
                        continue;
                    };
                    let key = matcher.key().to_owned();
                    if config.matchers.insert(key.clone(), matcher).is_some() {
                        warn!("Duplicate matcher `{}`, keeping the last definition", key);
                    }
                }
            }
            Some(other) => warn!("Ignoring `matchers`, expected a list but got {:?}", other),
        }

        Ok(config)
    }

    /// Like [`ConfigurationParser::parse`], but logs failures and returns
    /// `None` so that a broken OWNERS file is treated as an absent one.
    pub fn parse_lenient(&self, source: &[u8]) -> Option<OwnersConfig> {
        match self.parse(source) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!("Unable to read YAML Owners file: {}", err);
                None
            }
        }
    }

    fn parse_matcher(&self, entry: &Value) -> Option<Matcher> {
        let Value::Mapping(entry) = entry else {
            warn!("Ignoring invalid element {:?}", entry);
            return None;
        };

        let Some((kind, pattern)) = matcher_pattern(entry) else {
            warn!("Ignoring invalid element {:?}", entry);
            return None;
        };

        let pattern = match Pattern::new(kind, &pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(
                    "Ignoring {} matcher with invalid pattern `{}`: {}",
                    kind, pattern, err
                );
                return None;
            }
        };

        let owner_identities = text_list(entry.get("owners"), "owners");
        if owner_identities.is_empty() {
            warn!(
                "Ignoring {} matcher `{}` without owners",
                kind, pattern.as_str()
            );
            return None;
        }

        let (owners, group_owners) = self.resolve_owners(&owner_identities);
        if owners.is_empty() {
            warn!(
                "Ignoring {} matcher `{}`: none of its owners resolve to an account",
                kind, pattern.as_str()
            );
            return None;
        }

        let reviewers = text_list(entry.get("reviewers"), "reviewers")
            .iter()
            .flat_map(|reviewer| self.accounts.find(reviewer))
            .collect();

        Some(Matcher::new(pattern, owners, reviewers, group_owners))
    }

    // Groups resolve to their members; the identities are also kept as
    // written for display.
    fn resolve_owners(
        &self,
        identities: &BTreeSet<String>,
    ) -> (BTreeSet<AccountId>, BTreeSet<String>) {
        let owners = identities
            .iter()
            .flat_map(|identity| self.accounts.find(identity))
            .collect();
        let group_owners = identities
            .iter()
            .map(|identity| strip_owner_domain(identity).to_owned())
            .collect();
        (owners, group_owners)
    }
}

fn matcher_pattern(entry: &Mapping) -> Option<(PatternKind, String)> {
    MATCHER_KINDS.iter().find_map(|&kind| {
        entry
            .get(kind.key())
            .and_then(scalar_text)
            .map(|pattern| (kind, pattern))
    })
}

fn parse_inherited(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(inherited)) => *inherited,
        Some(other) => {
            warn!(
                "Expected a boolean for `inherited` but got {:?}, assuming true",
                other
            );
            true
        }
    }
}

/// A scalar or a list of scalars, flattened to a set of strings.
fn text_list(value: Option<&Value>, section: &str) -> BTreeSet<String> {
    match value {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| {
                let text = scalar_text(item);
                if text.is_none() {
                    warn!("Ignoring invalid `{}` element {:?}", section, item);
                }
                text
            })
            .collect(),
        Some(other) => match scalar_text(other) {
            Some(text) => BTreeSet::from([text]),
            None => {
                warn!("Ignoring invalid `{}` section {:?}", section, other);
                BTreeSet::new()
            }
        },
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
