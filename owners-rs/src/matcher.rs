use std::{collections::BTreeSet, fmt};

use regex::Regex;

use crate::accounts::AccountId;

/// Pattern of a [`Matcher`]. The variant decides how a path is tested.
#[derive(Clone)]
pub enum Pattern {
    /// The path equals the pattern.
    Exact(String),
    /// The path ends with the pattern.
    Suffix(String),
    /// The whole path matches the regex.
    Regex(String, Regex),
    /// The regex matches somewhere inside the path.
    PartialRegex(String, Regex),
    /// Like `Regex`, but only consulted when no other matcher applies to a
    /// path. `.*` is the catch-all, consulted last.
    Generic(String, Regex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternKind {
    Exact,
    Suffix,
    Regex,
    PartialRegex,
    Generic,
}

impl PatternKind {
    /// The key introducing this variant in an OWNERS `matchers` entry.
    pub fn key(self) -> &'static str {
        match self {
            PatternKind::Exact => "exact",
            PatternKind::Suffix => "suffix",
            PatternKind::Regex => "regex",
            PatternKind::PartialRegex => "partial_regex",
            PatternKind::Generic => "generic",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Precedence tier of a matcher. For a given path, matchers of a tier are
/// only consulted if no matcher of a higher tier matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatcherLevel {
    Regular,
    Fallback,
    CatchAll,
}

pub const CATCH_ALL_PATTERN: &str = ".*";

impl Pattern {
    pub fn new(kind: PatternKind, pattern: &str) -> Result<Pattern, regex::Error> {
        Ok(match kind {
            PatternKind::Exact => Pattern::Exact(pattern.to_owned()),
            PatternKind::Suffix => Pattern::Suffix(pattern.to_owned()),
            PatternKind::Regex => Pattern::Regex(pattern.to_owned(), anchored(pattern)?),
            PatternKind::PartialRegex => {
                Pattern::PartialRegex(pattern.to_owned(), Regex::new(pattern)?)
            }
            PatternKind::Generic => Pattern::Generic(pattern.to_owned(), anchored(pattern)?),
        })
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Pattern::Exact(_) => PatternKind::Exact,
            Pattern::Suffix(_) => PatternKind::Suffix,
            Pattern::Regex(..) => PatternKind::Regex,
            Pattern::PartialRegex(..) => PatternKind::PartialRegex,
            Pattern::Generic(..) => PatternKind::Generic,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(p)
            | Pattern::Suffix(p)
            | Pattern::Regex(p, _)
            | Pattern::PartialRegex(p, _)
            | Pattern::Generic(p, _) => p,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(p) => path == p,
            Pattern::Suffix(p) => path.ends_with(p.as_str()),
            Pattern::Regex(_, re) | Pattern::PartialRegex(_, re) | Pattern::Generic(_, re) => {
                re.is_match(path)
            }
        }
    }

    pub fn level(&self) -> MatcherLevel {
        match self {
            Pattern::Generic(p, _) if p == CATCH_ALL_PATTERN => MatcherLevel::CatchAll,
            Pattern::Generic(..) => MatcherLevel::Fallback,
            _ => MatcherLevel::Regular,
        }
    }
}

// Full-string match: the user pattern is wrapped in a non-capturing group so
// alternations stay anchored on both ends.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"\A(?:{})\z", pattern))
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.as_str() == other.as_str()
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind(), self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot merge {left_kind} matcher `{left}` with {right_kind} matcher `{right}`")]
pub struct MatcherMergeError {
    pub left_kind: PatternKind,
    pub left: String,
    pub right_kind: PatternKind,
    pub right: String,
}

/// A path predicate with its own owners, narrower than the directory-level
/// owners of the OWNERS file declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub pattern: Pattern,
    pub owners: BTreeSet<AccountId>,
    pub reviewers: BTreeSet<AccountId>,
    pub group_owners: BTreeSet<String>,
}

impl Matcher {
    pub fn new(
        pattern: Pattern,
        owners: BTreeSet<AccountId>,
        reviewers: BTreeSet<AccountId>,
        group_owners: BTreeSet<String>,
    ) -> Self {
        Matcher {
            pattern,
            owners,
            reviewers,
            group_owners,
        }
    }

    /// The key of this matcher within an OWNERS file: its pattern string.
    pub fn key(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn kind(&self) -> PatternKind {
        self.pattern.kind()
    }

    pub fn level(&self) -> MatcherLevel {
        self.pattern.level()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    /// Union of both matchers' owners, reviewers and group owners. Both must
    /// share the same variant and pattern.
    pub fn merge(&self, other: &Matcher) -> Result<Matcher, MatcherMergeError> {
        if self.pattern != other.pattern {
            return Err(MatcherMergeError {
                left_kind: self.kind(),
                left: self.key().to_owned(),
                right_kind: other.kind(),
                right: other.key().to_owned(),
            });
        }

        Ok(Matcher {
            pattern: self.pattern.clone(),
            owners: self.owners.union(&other.owners).copied().collect(),
            reviewers: self.reviewers.union(&other.reviewers).copied().collect(),
            group_owners: self
                .group_owners
                .union(&other.group_owners)
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(kind: PatternKind, pattern: &str, owners: &[u32]) -> Matcher {
        Matcher::new(
            Pattern::new(kind, pattern).unwrap(),
            owners.iter().copied().map(AccountId).collect(),
            BTreeSet::new(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_exact() {
        let m = matcher(PatternKind::Exact, "project/file.txt", &[1]);
        assert!(m.matches("project/file.txt"));
        assert!(!m.matches("project/file.txtx"));
        assert!(!m.matches("other/project/file.txt"));
    }

    #[test]
    fn test_suffix() {
        let m = matcher(PatternKind::Suffix, ".sql", &[1]);
        for path in ["a.sql", "dir/b.sql", ".sql", "a.sqlx", "sql", ""] {
            assert_eq!(m.matches(path), path.ends_with(".sql"), "path {:?}", path);
        }
    }

    #[test]
    fn test_regex_is_anchored() {
        let m = matcher(PatternKind::Regex, ".*/a.*", &[1]);
        assert!(m.matches("project/afile2.sql"));
        assert!(!m.matches("project/file.sql"));

        let alternation = matcher(PatternKind::Regex, "foo|bar", &[1]);
        assert!(alternation.matches("foo"));
        assert!(!alternation.matches("foobar"));
        assert!(!alternation.matches("xbar"));
    }

    #[test]
    fn test_partial_regex() {
        let m = matcher(PatternKind::PartialRegex, "alfa", &[1]);
        assert!(m.matches("projectalfa"));
        assert!(m.matches("alfa/beta"));
        assert!(!m.matches("project/alf"));
    }

    #[test]
    fn test_levels() {
        let examples = vec![
            (PatternKind::Exact, "a", MatcherLevel::Regular),
            (PatternKind::Suffix, ".c", MatcherLevel::Regular),
            (PatternKind::Regex, ".*", MatcherLevel::Regular),
            (PatternKind::PartialRegex, "x", MatcherLevel::Regular),
            (PatternKind::Generic, r".*\.c", MatcherLevel::Fallback),
            (PatternKind::Generic, ".*", MatcherLevel::CatchAll),
        ];
        for (kind, pattern, level) in examples {
            assert_eq!(
                matcher(kind, pattern, &[]).level(),
                level,
                "{} {}",
                kind,
                pattern
            );
        }
    }

    #[test]
    fn test_invalid_regex() {
        assert!(Pattern::new(PatternKind::Regex, "(unclosed").is_err());
        assert!(Pattern::new(PatternKind::Suffix, "(unclosed").is_ok());
    }

    #[test]
    fn test_merge_unions_owners() {
        let mut left = matcher(PatternKind::Suffix, ".sql", &[1, 2]);
        left.group_owners.insert("group/db".to_owned());
        let mut right = matcher(PatternKind::Suffix, ".sql", &[2, 3]);
        right.reviewers.insert(AccountId(9));

        let merged = left.merge(&right).unwrap();
        assert_eq!(
            merged.owners,
            BTreeSet::from([AccountId(1), AccountId(2), AccountId(3)])
        );
        assert_eq!(merged.reviewers, BTreeSet::from([AccountId(9)]));
        assert_eq!(merged.group_owners, BTreeSet::from(["group/db".to_owned()]));
        for path in ["x.sql", "x.sq", "dir/y.sql"] {
            assert_eq!(merged.matches(path), left.matches(path));
        }
    }

    #[test]
    fn test_merge_rejects_mismatched_variants() {
        let exact = matcher(PatternKind::Exact, "foo", &[1]);
        let suffix = matcher(PatternKind::Suffix, "foo", &[2]);
        let err = exact.merge(&suffix).unwrap_err();
        assert_eq!(err.left_kind, PatternKind::Exact);
        assert_eq!(err.right_kind, PatternKind::Suffix);
    }
}
