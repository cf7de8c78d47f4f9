use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;
use tracing::debug;

use crate::{
    accounts::AccountId,
    label::{LabelDefinition, CODE_REVIEW},
    resolver::OwnersMap,
};

/// How a label's votes combine, following the host's label functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum LabelFunction {
    #[default]
    MaxWithBlock,
    AnyWithBlock,
    MaxNoBlock,
    NoBlock,
    NoOp,
    PatchSetLock,
}

impl LabelFunction {
    pub fn is_max_value_required(self) -> bool {
        matches!(self, Self::MaxWithBlock | Self::MaxNoBlock)
    }

    pub fn is_block(self) -> bool {
        matches!(self, Self::MaxWithBlock | Self::AnyWithBlock)
    }
}

/// A label as configured in a project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LabelType {
    pub name: String,
    #[serde(default)]
    pub function: LabelFunction,
    pub values: Vec<i16>,
    #[serde(default)]
    pub default_value: i16,
    #[serde(default)]
    pub ignore_self_approval: bool,
}

impl LabelType {
    pub fn new(name: &str, values: &[i16]) -> Self {
        LabelType {
            name: name.to_owned(),
            function: LabelFunction::default(),
            values: values.to_vec(),
            default_value: 0,
            ignore_self_approval: false,
        }
    }

    /// `Code-Review` from -2 to +2, max with block.
    pub fn code_review() -> Self {
        LabelType::new(CODE_REVIEW, &[-2, -1, 0, 1, 2])
    }

    pub fn with_function(mut self, function: LabelFunction) -> Self {
        self.function = function;
        self
    }

    pub fn with_ignore_self_approval(mut self, ignore_self_approval: bool) -> Self {
        self.ignore_self_approval = ignore_self_approval;
        self
    }

    pub fn max_value(&self) -> i16 {
        self.values
            .iter()
            .copied()
            .max()
            .unwrap_or(self.default_value)
    }

    pub fn min_value(&self) -> i16 {
        self.values
            .iter()
            .copied()
            .min()
            .unwrap_or(self.default_value)
    }
}

/// The labels defined in a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LabelTypes(Vec<LabelType>);

impl LabelTypes {
    pub fn new(types: Vec<LabelType>) -> Self {
        LabelTypes(types)
    }

    pub fn by_name(&self, name: &str) -> Option<&LabelType> {
        self.0.iter().find(|label_type| label_type.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("label {label} not found in project {project}")]
    LabelNotFound { label: String, project: String },
}

/// The label owners vote on, with the score OWNERS may require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    pub label_type: LabelType,
    pub score: Option<i16>,
}

/// Look up the configured label, or `Code-Review`, in the project's labels.
/// A label the project doesn't define is an error rather than "no
/// requirement".
pub fn resolve_label(
    types: &LabelTypes,
    configured: Option<&LabelDefinition>,
    project: &str,
) -> Result<ResolvedLabel, ApprovalError> {
    let name = configured.map_or(CODE_REVIEW, |label| label.name.as_str());
    let label_type = types
        .by_name(name)
        .ok_or_else(|| ApprovalError::LabelNotFound {
            label: name.to_owned(),
            project: project.to_owned(),
        })?;
    Ok(ResolvedLabel {
        label_type: label_type.clone(),
        score: configured.and_then(|label| label.score),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Approval {
    pub label: String,
    pub value: i16,
}

/// The uploader of the current patch set and everybody's votes on it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeApprovals {
    pub uploader: AccountId,
    #[serde(default)]
    pub votes: BTreeMap<AccountId, Vec<Approval>>,
}

impl ChangeApprovals {
    pub fn new(uploader: AccountId) -> Self {
        ChangeApprovals {
            uploader,
            votes: BTreeMap::new(),
        }
    }

    pub fn with_vote(mut self, account: AccountId, label: &str, value: i16) -> Self {
        self.votes.entry(account).or_default().push(Approval {
            label: label.to_owned(),
            value,
        });
        self
    }

    fn votes_of(&self, account: AccountId) -> &[Approval] {
        self.votes.get(&account).map_or(&[], Vec::as_slice)
    }
}

/// Whether a single vote by `owner` approves `label`.
pub fn is_label_approved(
    label: &ResolvedLabel,
    owner: AccountId,
    uploader: AccountId,
    approval: &Approval,
) -> bool {
    let label_type = &label.label_type;
    if approval.label != label_type.name {
        return false;
    }
    if label_type.ignore_self_approval && owner == uploader {
        return false;
    }
    if let Some(score) = label.score {
        return approval.value >= score;
    }
    if label_type.function.is_max_value_required() {
        return approval.value == label_type.max_value();
    }
    if is_veto(label, approval) {
        return false;
    }
    approval.value > label_type.default_value
}

fn is_veto(label: &ResolvedLabel, approval: &Approval) -> bool {
    let label_type = &label.label_type;
    approval.label == label_type.name
        && label_type.function.is_block()
        && approval.value == label_type.min_value()
}

/// Whether `owners` still lack an approval. Any owner's block vote fails the
/// requirement on its own.
pub fn is_approval_missing(
    owners: &BTreeSet<AccountId>,
    label: &ResolvedLabel,
    approvals: &ChangeApprovals,
) -> bool {
    let mut approved = false;
    for &owner in owners {
        for approval in approvals.votes_of(owner) {
            if is_veto(label, approval) {
                debug!("{} vetoed {}", owner, label.label_type.name);
                return true;
            }
            approved |= is_label_approved(label, owner, approvals.uploader, approval);
        }
    }
    !approved
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    Ok,
    NotReady { missing_paths: BTreeSet<String> },
}

impl SubmitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SubmitStatus::Ok)
    }

    pub fn message(&self) -> String {
        match self {
            SubmitStatus::Ok => "All modified files are approved by their owners".to_owned(),
            SubmitStatus::NotReady { missing_paths } => format!(
                "Missing approvals from owners of {} file(s): {}",
                missing_paths.len(),
                missing_paths
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Decide whether every owned file of a change has an owner's approval.
/// A change without owned files is ready.
pub fn evaluate(
    owners_map: &OwnersMap,
    label_types: &LabelTypes,
    approvals: &ChangeApprovals,
    project: &str,
) -> Result<SubmitStatus, ApprovalError> {
    let mut labels: HashMap<Option<&LabelDefinition>, ResolvedLabel> = HashMap::new();
    let mut missing_paths = BTreeSet::new();

    for (path, owners) in &owners_map.file_owners {
        let configured = owners_map
            .file_labels
            .get(path)
            .or(owners_map.label.as_ref());
        if !labels.contains_key(&configured) {
            let resolved = resolve_label(label_types, configured, project)?;
            labels.insert(configured, resolved);
        }

        if is_approval_missing(owners, &labels[&configured], approvals) {
            missing_paths.insert(path.clone());
        }
    }

    if missing_paths.is_empty() {
        Ok(SubmitStatus::Ok)
    } else {
        Ok(SubmitStatus::NotReady { missing_paths })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cache::NoCache,
        resolver::{OwnersResolver, ResolveOptions, ResolveRequest},
        testutil::{branch_blobs, ids, test_accounts},
    };

    use super::*;

    const OWNER: AccountId = AccountId(1);
    const OTHER_OWNER: AccountId = AccountId(2);
    const UPLOADER: AccountId = AccountId(9);

    fn resolved(label_type: LabelType, score: Option<i16>) -> ResolvedLabel {
        ResolvedLabel { label_type, score }
    }

    fn vote(label: &str, value: i16) -> Approval {
        Approval {
            label: label.to_owned(),
            value,
        }
    }

    fn owners_map(files: &[(&str, &[u32])], label: Option<LabelDefinition>) -> OwnersMap {
        OwnersMap {
            file_owners: files
                .iter()
                .map(|(path, owners)| ((*path).to_owned(), ids(owners)))
                .collect(),
            label,
            ..OwnersMap::default()
        }
    }

    #[test]
    fn test_resolve_label() {
        let verified_type = LabelType::new("Verified", &[-1, 0, 1]);
        let types = LabelTypes::new(vec![LabelType::code_review(), verified_type]);

        let default = resolve_label(&types, None, "p").unwrap();
        assert_eq!(default.label_type.name, CODE_REVIEW);
        assert_eq!(default.score, None);

        let verified = LabelDefinition::new("Verified", Some(1));
        let verified = resolve_label(&types, Some(&verified), "p").unwrap();
        assert_eq!(verified.score, Some(1));

        let missing = LabelDefinition::new("Owners-Review", Some(2));
        assert_eq!(
            resolve_label(&types, Some(&missing), "p"),
            Err(ApprovalError::LabelNotFound {
                label: "Owners-Review".to_owned(),
                project: "p".to_owned()
            })
        );
        assert!(resolve_label(&LabelTypes::default(), None, "p").is_err());
    }

    #[test]
    fn test_is_label_approved() {
        let approved = |label: &ResolvedLabel, value| {
            is_label_approved(label, OWNER, UPLOADER, &vote("Foo", value))
        };

        // the maximum value is required
        let max_type =
            LabelType::new("Foo", &[-1, 0, 1]).with_function(LabelFunction::MaxNoBlock);
        let max = resolved(max_type, None);
        assert!(!approved(&max, 0));
        assert!(approved(&max, 1));
        assert!(!is_label_approved(&max, OWNER, UPLOADER, &vote("Bar", 1)));

        // any positive value, unless a score is configured
        let any_type = LabelType::new("Foo", &[-1, 0, 1, 2, 3])
            .with_function(LabelFunction::AnyWithBlock);
        let any = resolved(any_type.clone(), None);
        assert!(!approved(&any, -1));
        assert!(!approved(&any, 0));
        assert!(approved(&any, 1));
        let scored = resolved(any_type, Some(2));
        assert!(!approved(&scored, 1));
        assert!(approved(&scored, 3));

        let no_self_type = LabelType::new("Foo", &[-1, 0, 1]).with_ignore_self_approval(true);
        let no_self = resolved(no_self_type, None);
        assert!(!is_label_approved(&no_self, OWNER, OWNER, &vote("Foo", 1)));
    }

    #[test]
    fn test_is_approval_missing() {
        let label_type =
            LabelType::new("Foo", &[-1, 0, 1, 2]).with_function(LabelFunction::MaxNoBlock);
        let label = resolved(label_type, Some(2));
        let owners = BTreeSet::from([OWNER, OTHER_OWNER]);

        let by_uploader = ChangeApprovals::new(UPLOADER).with_vote(UPLOADER, "Foo", 2);
        assert!(is_approval_missing(&owners, &label, &by_uploader));

        let by_one_owner = ChangeApprovals::new(UPLOADER).with_vote(OWNER, "Foo", 2);
        assert!(!is_approval_missing(&owners, &label, &by_one_owner));

        let too_low = ChangeApprovals::new(UPLOADER).with_vote(OWNER, "Foo", 1);
        assert!(is_approval_missing(&owners, &label, &too_low));
    }

    #[test]
    fn test_veto_fails_the_requirement() {
        let label = resolved(LabelType::code_review(), None);
        let owners = BTreeSet::from([OWNER, OTHER_OWNER]);
        let approvals = ChangeApprovals::new(UPLOADER)
            .with_vote(OWNER, CODE_REVIEW, 2)
            .with_vote(OTHER_OWNER, CODE_REVIEW, -2);
        assert!(is_approval_missing(&owners, &label, &approvals));
    }

    #[test]
    fn test_explicit_score() {
        let types = LabelTypes::new(vec![LabelType::new("Owners", &[-1, 0, 1, 2, 5])]);
        let label = LabelDefinition::new("Owners", Some(2));
        let map = owners_map(&[("f.txt", &[1])], Some(label));

        let examples = vec![
            (OWNER, 1, false),
            (OWNER, 2, true),
            (AccountId(3), 5, false),
        ];
        for (account, value, expected) in examples {
            let approvals = ChangeApprovals::new(UPLOADER).with_vote(account, "Owners", value);
            let status = evaluate(&map, &types, &approvals, "p").unwrap();
            assert_eq!(status.is_ok(), expected, "votes {:?}", approvals.votes);
        }
    }

    #[test]
    fn test_self_approval_of_sole_owner() {
        let label_type = LabelType::code_review().with_ignore_self_approval(true);
        let types = LabelTypes::new(vec![label_type]);
        let map = owners_map(&[("f.txt", &[1])], None);
        for value in -2..=2 {
            let approvals = ChangeApprovals::new(OWNER).with_vote(OWNER, CODE_REVIEW, value);
            let status = evaluate(&map, &types, &approvals, "p").unwrap();
            assert!(!status.is_ok(), "value {}", value);
        }
    }

    #[test]
    fn test_code_review_scenario() {
        let types = LabelTypes::new(vec![LabelType::code_review()]);
        let map = owners_map(&[("a.txt", &[1])], None);

        let approved = ChangeApprovals::new(UPLOADER).with_vote(OWNER, CODE_REVIEW, 2);
        assert_eq!(evaluate(&map, &types, &approved, "p"), Ok(SubmitStatus::Ok));

        let plus_one = ChangeApprovals::new(UPLOADER).with_vote(OWNER, CODE_REVIEW, 1);
        let status = evaluate(&map, &types, &plus_one, "p").unwrap();
        assert_eq!(
            status,
            SubmitStatus::NotReady {
                missing_paths: BTreeSet::from(["a.txt".to_owned()])
            }
        );
        assert_eq!(
            status.message(),
            "Missing approvals from owners of 1 file(s): a.txt"
        );
    }

    #[test]
    fn test_no_owned_files() {
        let approvals = ChangeApprovals::new(UPLOADER);
        let map = OwnersMap::default();
        let status = evaluate(&map, &LabelTypes::default(), &approvals, "p");
        assert_eq!(status, Ok(SubmitStatus::Ok));
    }

    #[test]
    fn test_group_owned_file_needs_a_vote() {
        let blobs = branch_blobs("project", "master", &[("OWNERS", "owners: [group/core]\n")]);
        let accounts = test_accounts();
        let options = ResolveOptions {
            expand_groups: false,
            ..ResolveOptions::default()
        };
        let request = ResolveRequest::new("project", "master", ["secret.rs"]);
        let map = OwnersResolver::new(&blobs, &accounts, &NoCache, options)
            .resolve(&request)
            .unwrap();
        let types = LabelTypes::new(vec![LabelType::code_review()]);

        let status = evaluate(&map, &types, &ChangeApprovals::new(UPLOADER), "project");
        assert_eq!(
            status,
            Ok(SubmitStatus::NotReady {
                missing_paths: BTreeSet::from(["secret.rs".to_owned()])
            })
        );

        let approvals = ChangeApprovals::new(UPLOADER).with_vote(OTHER_OWNER, CODE_REVIEW, 2);
        assert_eq!(
            evaluate(&map, &types, &approvals, "project"),
            Ok(SubmitStatus::Ok)
        );
    }

    #[test]
    fn test_missing_label_blocks() {
        let label = LabelDefinition::new("Owners", None);
        let map = owners_map(&[("a.txt", &[1])], Some(label));
        let approvals = ChangeApprovals::new(UPLOADER).with_vote(OWNER, "Owners", 2);
        let types = LabelTypes::new(vec![LabelType::code_review()]);
        assert!(matches!(
            evaluate(&map, &types, &approvals, "p"),
            Err(ApprovalError::LabelNotFound { .. })
        ));
    }

    #[test]
    fn test_per_file_labels() {
        let types = LabelTypes::new(vec![
            LabelType::code_review(),
            LabelType::new("Docs", &[0, 1]).with_function(LabelFunction::NoBlock),
        ]);
        let mut map = owners_map(&[("docs/a.md", &[1]), ("src/b.rs", &[1])], None);
        map.file_labels
            .insert("docs/a.md".to_owned(), LabelDefinition::new("Docs", None));

        let approvals = ChangeApprovals::new(UPLOADER).with_vote(OWNER, "Docs", 1);
        assert_eq!(
            evaluate(&map, &types, &approvals, "p"),
            Ok(SubmitStatus::NotReady {
                missing_paths: BTreeSet::from(["src/b.rs".to_owned()])
            })
        );
    }

    #[test]
    fn test_votes_from_yaml() {
        let approvals: ChangeApprovals = serde_yaml::from_str(
            "uploader: 9\nvotes:\n  1:\n    - label: Code-Review\n      value: 2\n",
        )
        .unwrap();
        assert_eq!(
            approvals,
            ChangeApprovals::new(UPLOADER).with_vote(OWNER, CODE_REVIEW, 2)
        );
    }
}
