//! Command handlers behind the `init`/`list`/`put`/`get`/`touch`/`raw`/
//! `copy`/`paste` subcommands. Each handler takes already-parsed clap
//! arguments plus whatever ambient config it needs and returns a
//! `CliError` whose `exit_code()` is the process's actual exit status;
//! `src/main.rs` owns turning that into a printed message and the real
//! `std::process::exit` call.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::access_slice::Capability;
use crate::container::Entry;
use crate::error::Error as SafeError;
use crate::executor::{self, ExecutorKind};
use crate::group::GroupProgress;
use crate::safe::{ContainerPasswords, CreateParams, Safe};

use crate::cmd::clipboard::{Clipboard, UnavailableClipboard};
use crate::config::CliConfig;

/// `--output text|json`, applied to every subcommand that prints anything.
#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

fn print_json<T: serde::Serialize>(v: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn print_text_line(s: impl AsRef<str>) {
    println!("{}", s.as_ref());
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Safe(#[from] SafeError),
    #[error("no container matches that password")]
    NoMatchingContainer,
    #[error("input must not be empty")]
    EmptyInput,
    #[error("no entry matches that key")]
    NoEntryMatches,
    #[error("multiple entries match that key")]
    MultipleMatches,
    #[error("clipboard is unavailable")]
    ClipboardUnavailable,
    /// Anything outside the modeled safe-file errors: config I/O, a
    /// malformed progress callback, etc.
    #[error("{0}")]
    Other(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Safe(SafeError::SafeAlreadyExists(_)) => -10,
            CliError::Safe(SafeError::SafeNotFound(_)) => -5,
            CliError::Safe(SafeError::SafeLocked(_)) => -6,
            CliError::Safe(SafeError::WrongMagic) | CliError::Safe(SafeError::SafeFormat(_)) => -13,
            CliError::Safe(SafeError::UnsafeParameter(_)) => -9,
            CliError::Safe(SafeError::MissingKey) => -2,
            CliError::Safe(_) => -12,
            CliError::NoMatchingContainer => -1,
            CliError::EmptyInput => -3,
            CliError::NoEntryMatches => -4,
            CliError::MultipleMatches => -8,
            CliError::ClipboardUnavailable => -7,
            CliError::Other(_) => -12,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InitCmd {
    /// One master password per container (up to six).
    #[arg(short = 'p', long = "password", required = true, num_args = 1..)]
    pub passwords: Vec<String>,
    /// Adds a list-only sub-password; only valid with a single master password.
    #[arg(long = "list-password")]
    pub list_password: Option<String>,
    /// Adds an append-only sub-password; only valid with a single master password.
    #[arg(long = "append-password")]
    pub append_password: Option<String>,
    #[arg(short = 'N', long = "n-blocks", default_value_t = crate::safe::DEFAULT_N_BLOCKS)]
    pub n_blocks: u32,
    #[arg(long = "block-index-size", default_value_t = 2)]
    pub block_index_size: u8,
    #[arg(long = "gp-bits", default_value_t = crate::group::MIN_SAFE_BITS)]
    pub gp_bits: u64,
    /// Use the bundled precomputed group parameters instead of searching.
    #[arg(short = 'P', long)]
    pub precomputed: bool,
    /// Permit a group size or parameter choice that is not recommended.
    #[arg(long = "i-know-its-unsafe")]
    pub unsafe_override: bool,
    /// Overwrite an existing safe at the target path.
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListCmd {
    #[arg(short = 'p', long = "password")]
    pub password: String,
    /// Include secrets in the listing (only visible with a `Full` password).
    #[arg(long)]
    pub with_secrets: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PutCmd {
    #[arg(short = 'p', long = "password")]
    pub password: String,
    #[arg(short = 's', long = "secret")]
    pub secret: String,
    pub key: String,
    #[arg(default_value = "")]
    pub note: String,
}

#[derive(Args, Debug, Clone)]
pub struct GetCmd {
    #[arg(short = 'p', long = "password")]
    pub password: String,
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct CopyCmd {
    #[arg(short = 'p', long = "password")]
    pub password: String,
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct TouchCmd {
    /// Overwrite free space too, not just blocks a known password reaches.
    #[arg(long)]
    pub trash_freespace: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RawCmd;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

fn open_executor(cfg: &CliConfig) -> Box<dyn executor::Executor> {
    let kind = if cfg.process_workers { ExecutorKind::Processes } else { ExecutorKind::Threads };
    executor::build(kind, cfg.workers)
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    pb
}

fn report_progress(pb: &ProgressBar, p: GroupProgress) {
    match p {
        GroupProgress::Searching { tested } => pb.set_message(format!("searching for a safe prime... {tested} candidates ruled out")),
        GroupProgress::FixingGenerator => pb.set_message("fixing a generator..."),
    }
}

pub fn cmd_init(path: &Path, cfg: &CliConfig, args: InitCmd, fmt: OutputFormat) -> Result<(), CliError> {
    if args.passwords.iter().any(|p| p.is_empty()) {
        return Err(CliError::EmptyInput);
    }
    let passwords: Vec<ContainerPasswords> = args
        .passwords
        .iter()
        .map(|master| ContainerPasswords {
            master: master.clone(),
            list: if args.passwords.len() == 1 { args.list_password.clone() } else { None },
            append: if args.passwords.len() == 1 { args.append_password.clone() } else { None },
        })
        .collect();

    let pb = progress_bar();
    let progress = |p: GroupProgress| report_progress(&pb, p);
    let params = CreateParams {
        n_blocks: args.n_blocks,
        block_index_size: args.block_index_size,
        gp_bits: args.gp_bits,
        precomputed: args.precomputed,
        unsafe_override: args.unsafe_override,
        overwrite_existing: args.force,
        progress: &progress,
    };
    let executor = open_executor(cfg);
    let safe = Safe::create(path, passwords, params, executor.as_ref())?;
    pb.finish_and_clear();

    if fmt.is_json() {
        print_json(&serde_json::json!({
            "result": "created",
            "path": path.display().to_string(),
            "n-blocks": safe.n_blocks(),
            "containers": args.passwords.len(),
        }))
        .ok();
    } else {
        print_text_line(format!(
            "{} safe with {} container(s) at {}",
            "Created".green(),
            args.passwords.len(),
            path.display()
        ));
    }
    Ok(())
}

/// Open every container `password` unlocks, silently migrating any staged
/// append entries. Returns `NoMatchingContainer` rather than an empty `Vec`
/// so every caller enforces the CLI's exit-code table the same way.
fn open_one(safe: &mut Safe, password: &str) -> Result<crate::container::Container, CliError> {
    let mut containers = safe.open_containers(password, |_migrated: &[Entry]| {})?;
    if containers.is_empty() {
        return Err(CliError::NoMatchingContainer);
    }
    Ok(containers.remove(0))
}

pub fn cmd_list(path: &Path, args: ListCmd, fmt: OutputFormat) -> Result<(), CliError> {
    let mut safe = Safe::open(path)?;
    let container = open_one(&mut safe, &args.password)?;
    let entries = container.list(args.with_secrets)?;
    if fmt.is_json() {
        print_json_entries(&entries).ok();
    } else {
        print_text_line(format!("# capability: {}", capability_label(container.kind())).dimmed().to_string());
        for e in &entries {
            match &e.secret {
                Some(s) => print_text_line(format!("{}\t{}\t{}", e.key, e.note, s)),
                None => print_text_line(format!("{}\t{}", e.key, e.note)),
            }
        }
    }
    Ok(())
}

fn print_json_entries(entries: &[Entry]) -> anyhow::Result<()> {
    let j: Vec<_> = entries
        .iter()
        .map(|e| serde_json::json!({"key": e.key, "note": e.note, "secret": e.secret}))
        .collect();
    print_json(&j)
}

pub fn cmd_put(path: &Path, cfg: &CliConfig, args: PutCmd, fmt: OutputFormat) -> Result<(), CliError> {
    if args.key.is_empty() || args.secret.is_empty() {
        return Err(CliError::EmptyInput);
    }
    let mut safe = Safe::open(path)?;
    let mut container = open_one(&mut safe, &args.password)?;
    container.add(args.key.clone(), args.note.clone(), args.secret.clone())?;
    safe.save_container(&mut container)?;
    let executor = open_executor(cfg);
    safe.touch(executor.as_ref())?;

    if fmt.is_json() {
        print_json(&serde_json::json!({"result": "added", "key": args.key})).ok();
    } else {
        print_text_line(format!("{} {}", "Added".green(), args.key));
    }
    Ok(())
}

pub fn cmd_get(path: &Path, args: GetCmd, fmt: OutputFormat) -> Result<(), CliError> {
    let mut safe = Safe::open(path)?;
    let container = open_one(&mut safe, &args.password)?;
    let matches = container.get(&args.key)?;
    match matches.len() {
        0 => Err(CliError::NoEntryMatches),
        1 => {
            let secret = matches[0].secret.clone().unwrap_or_default();
            if fmt.is_json() {
                print_json(&serde_json::json!({"key": args.key, "secret": secret})).ok();
            } else {
                print_text_line(secret);
            }
            Ok(())
        }
        _ => Err(CliError::MultipleMatches),
    }
}

pub fn cmd_copy(path: &Path, args: CopyCmd) -> Result<(), CliError> {
    let mut safe = Safe::open(path)?;
    let container = open_one(&mut safe, &args.password)?;
    let matches = container.get(&args.key)?;
    let secret = match matches.len() {
        0 => return Err(CliError::NoEntryMatches),
        1 => matches[0].secret.clone().unwrap_or_default(),
        _ => return Err(CliError::MultipleMatches),
    };
    UnavailableClipboard.copy(&secret).map_err(|_| CliError::ClipboardUnavailable)
}

pub fn cmd_paste() -> Result<(), CliError> {
    UnavailableClipboard.paste().map(|_| ()).map_err(|_| CliError::ClipboardUnavailable)
}

pub fn cmd_touch(path: &Path, cfg: &CliConfig, args: TouchCmd, fmt: OutputFormat) -> Result<(), CliError> {
    let mut safe = Safe::open(path)?;
    let executor = open_executor(cfg);
    if args.trash_freespace {
        safe.trash_freespace(executor.as_ref())?;
    } else {
        safe.touch(executor.as_ref())?;
    }
    if fmt.is_json() {
        print_json(&serde_json::json!({"result": "touched"})).ok();
    } else {
        print_text_line("Touched".green().to_string());
    }
    Ok(())
}

pub fn cmd_raw(path: &Path, fmt: OutputFormat) -> Result<(), CliError> {
    let safe = Safe::open(path)?;
    let data = safe.data();
    if fmt.is_json() {
        let blocks: Vec<_> = (0..data.len())
            .map(|i| {
                let b = data.get(i);
                serde_json::json!({
                    "c1": crate::block::biguint_to_hex(&b.c1),
                    "c2": crate::block::biguint_to_hex(&b.c2),
                    "h": crate::block::biguint_to_hex(&b.h),
                })
            })
            .collect();
        print_json(&blocks).ok();
    } else {
        for i in 0..data.len() {
            let b = data.get(i);
            print_text_line(format!(
                "{i}\t{}\t{}\t{}",
                crate::block::biguint_to_hex(&b.c1),
                crate::block::biguint_to_hex(&b.c2),
                crate::block::biguint_to_hex(&b.h),
            ));
        }
    }
    Ok(())
}

pub fn default_safe_path(cfg: &CliConfig, override_path: Option<PathBuf>) -> PathBuf {
    override_path.unwrap_or_else(|| PathBuf::from(shellexpand::tilde(&cfg.safe_path).to_string()))
}

pub fn capability_label(kind: Capability) -> &'static str {
    match kind {
        Capability::Full => "full",
        Capability::ListOnly => "list-only",
        Capability::AppendOnly => "append-only",
    }
}
