mod reader;

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use owners_rs::{
    accounts::{AccountId, InMemoryAccounts},
    approval::{self, Approval, ChangeApprovals, LabelType, LabelTypes},
    resolver::OWNERS_FILE,
    OwnersMap, OwnersResolver, OwnersSettings, ResolveRequest,
};

use crate::reader::LocalTreeReader;

#[derive(Parser)]
#[command(version, about = "Resolve OWNERS files of a source tree")]
struct Cli {
    /// Checkout of the project's target branch
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[arg(long, default_value = "project")]
    project: String,

    #[arg(long, default_value = "master")]
    branch: String,

    /// Directory holding the project's config ref OWNERS file
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Parent project and the directory holding its config ref OWNERS file,
    /// closest parent first
    #[arg(long = "parent", value_name = "NAME=DIR", value_parser = parse_parent)]
    parents: Vec<(String, PathBuf)>,

    /// YAML account and group directory
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// YAML engine settings
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the owners of each file, walking the whole tree when no path is given
    Files { paths: Vec<PathBuf> },
    /// Check whether the recorded votes approve a change touching the given paths
    Check {
        /// YAML file with the uploader, the project's labels and the votes
        #[arg(long)]
        votes: PathBuf,
        paths: Vec<PathBuf>,
    },
}

/// Contents of the `--votes` file.
#[derive(Debug, Deserialize)]
struct VotesFile {
    uploader: AccountId,
    #[serde(default)]
    labels: Vec<LabelType>,
    #[serde(default)]
    votes: BTreeMap<AccountId, Vec<Approval>>,
}

fn parse_parent(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, dir)) if !name.is_empty() && !dir.is_empty() => {
            Ok((name.to_owned(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected NAME=DIR, got `{}`", arg)),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match &cli.settings {
        Some(path) => OwnersSettings::load(path)?,
        None => OwnersSettings::default(),
    };
    let accounts = match &cli.accounts {
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("unable to read accounts from {}", path.display()))?;
            InMemoryAccounts::from_yaml(&source)
                .with_context(|| format!("invalid accounts file {}", path.display()))?
        }
        None => InMemoryAccounts::new(),
    };

    let mut blobs = LocalTreeReader::new(&cli.project, &cli.root);
    if let Some(config_dir) = &cli.config_dir {
        blobs = blobs.with_config_dir(config_dir);
    }
    for (name, dir) in &cli.parents {
        blobs = blobs.with_parent(name, dir);
    }

    let cache = settings.build_cache();
    let options = settings.resolve_options();
    let resolver = OwnersResolver::new(&blobs, &accounts, cache.as_ref(), options);

    match &cli.command {
        Command::Files { paths } => {
            let files = collect_files(&cli.root, paths)?;
            let owners_map = resolver.resolve(&request(&cli, &settings, &files))?;
            for file in &files {
                let owners =
                    describe_owners(&owners_map, &accounts, settings.expand_groups, file);
                println!("{:<70}  {}", file, owners);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { votes, paths } => {
            let source = fs::read_to_string(votes)
                .with_context(|| format!("unable to read votes from {}", votes.display()))?;
            let votes_file: VotesFile = serde_yaml::from_str(&source)
                .with_context(|| format!("invalid votes file {}", votes.display()))?;
            let label_types = if votes_file.labels.is_empty() {
                LabelTypes::new(vec![LabelType::code_review()])
            } else {
                LabelTypes::new(votes_file.labels)
            };
            let approvals = ChangeApprovals {
                uploader: votes_file.uploader,
                votes: votes_file.votes,
            };

            let files = collect_files(&cli.root, paths)?;
            let owners_map = resolver.resolve(&request(&cli, &settings, &files))?;
            let status = approval::evaluate(&owners_map, &label_types, &approvals, &cli.project)?;
            println!("{}", status.message());
            Ok(if status.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn request(cli: &Cli, settings: &OwnersSettings, files: &BTreeSet<String>) -> ResolveRequest {
    ResolveRequest::new(&cli.project, &cli.branch, files.iter().cloned())
        .with_parents(cli.parents.iter().map(|(name, _)| name.clone()))
        .with_branch(settings.enabled_branch(&cli.branch))
}

fn describe_owners(
    owners_map: &OwnersMap,
    accounts: &InMemoryAccounts,
    expand_groups: bool,
    file: &str,
) -> String {
    let names = if expand_groups {
        owners_map
            .file_owners
            .get(file)
            .into_iter()
            .flatten()
            .map(|&id| {
                accounts
                    .account(id)
                    .map(|account| account.display_name())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect::<BTreeSet<_>>()
    } else {
        // Owners as written in the OWNERS files, groups left as references.
        owners_map
            .file_group_owners
            .get(file)
            .cloned()
            .unwrap_or_default()
    };

    if names.is_empty() {
        "(unowned)".to_owned()
    } else {
        names.into_iter().collect::<Vec<_>>().join(" ")
    }
}

/// Repository-relative paths of the given files, or of every file below the
/// given directories.
fn collect_files(root: &Path, paths: &[PathBuf]) -> Result<BTreeSet<String>> {
    let roots = if paths.is_empty() {
        vec![root.to_path_buf()]
    } else {
        paths.iter().map(|path| root.join(path)).collect()
    };

    let mut files = BTreeSet::new();
    for path in roots {
        if !path.exists() {
            return Err(anyhow!("path does not exist: {}", path.display()));
        }
        if path.is_dir() {
            for entry in walk_files(&path) {
                files.insert(relative_path(root, entry.path())?);
            }
        } else {
            files.insert(relative_path(root, &path)?);
        }
    }
    debug!("Collected {} files", files.len());
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside of {}", path.display(), root.display()))?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn walk_files(root: impl AsRef<Path>) -> impl Iterator<Item = walkdir::DirEntry> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter(|entry| entry.file_name() != OWNERS_FILE)
}
