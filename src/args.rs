//! Command-line argument resolution.
//!
//! The invocation is free-form: an optional leading file path, the question
//! (quoted or not), and flags anywhere in between. Only the flags below are
//! taken out of the invocation; every other token, dashes included, is part
//! of the question.

use crate::config::Config;
use crate::error::ArgumentError;
use crate::models::ModelFlag;
use crate::protocol::{QueryRequest, SpecialCommand};
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const USAGE: &str = "ai [file_path] <query> [--s|--p|--r|--deep] [--show-sources]";

const EXAMPLES: &str = "Examples:
  ai 'What is the capital of France?'
  ai document.pdf 'Summarize this document' --p
  ai ~/code/script.py Explain this code --r
  ai image.png What is in this image?";

/// Banner printed when `ai` is run without arguments.
pub fn usage_banner() -> String {
    let mut banner = format!("Smart-term AI CLI Tool\n\nUsage: {}\n\nModel flags:\n", USAGE);
    for flag in ModelFlag::ALL {
        banner.push_str(&format!(
            "  {:<8} Use {} model{}\n",
            flag.cli_flag(),
            flag.selection().model_id,
            if flag == ModelFlag::Fast { " (default)" } else { "" }
        ));
    }
    banner.push('\n');
    banner.push_str(EXAMPLES);
    banner
}

#[derive(Parser, Debug)]
#[command(name = "ai")]
#[command(version, about = "Ask an AI model from your terminal, optionally about a file")]
#[command(override_usage = USAGE)]
#[command(after_help = EXAMPLES)]
pub struct Cli {
    /// Optional file to attach, followed by the question (quotes optional)
    #[arg(value_name = "QUERY", num_args = 0..)]
    pub query: Vec<String>,

    /// Use the sonar model (default)
    #[arg(long = "s", action = ArgAction::Count)]
    pub fast: u8,

    /// Use the sonar-pro model
    #[arg(long = "p", action = ArgAction::Count)]
    pub pro: u8,

    /// Use the sonar-reasoning-pro model
    #[arg(long = "r", action = ArgAction::Count)]
    pub reasoning: u8,

    /// Use the sonar-deep-research model
    #[arg(long = "deep", action = ArgAction::Count)]
    pub deep: u8,

    /// List the sources cited in the answer
    #[arg(long = "show-sources", aliases = ["show-source", "show-s"])]
    pub show_sources: bool,

    /// Update smart-term to the latest version
    #[arg(long)]
    pub update: bool,

    /// Print something to pass the time
    #[arg(long)]
    pub bored: bool,
}

/// Clap argument ids of the model flags, paired with what they select.
const MODEL_FLAG_IDS: [(&str, ModelFlag); 4] = [
    ("fast", ModelFlag::Fast),
    ("pro", ModelFlag::Pro),
    ("reasoning", ModelFlag::Reasoning),
    ("deep", ModelFlag::Deep),
];

/// Flags taken out of the invocation, in lowercase. Matching ignores case.
const KNOWN_FLAGS: [&str; 9] = [
    "--s",
    "--p",
    "--r",
    "--deep",
    "--show-sources",
    "--show-source",
    "--show-s",
    "--update",
    "--bored",
];

/// Only honoured as the sole argument, so `tar -h` stays a question.
const INFO_FLAGS: [&str; 4] = ["--help", "-h", "--version", "-V"];

/// Parse raw invocation tokens (including the program name).
///
/// Known flags are pulled out wherever they appear and everything else is
/// handed to clap after `--`, so clap never reads question text as options.
/// `--help` and `--version` print and exit here, the way clap normally does.
pub fn parse_matches<I, T>(tokens: I) -> Result<ArgMatches, ArgumentError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::command().try_get_matches_from(split_flags(tokens)) {
        Ok(matches) => Ok(matches),
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => Err(ArgumentError::Invalid(e.render().to_string().trim().to_string())),
    }
}

/// Reorder the invocation as `program, flags.., --, question tokens..`.
fn split_flags<I, T>(tokens: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut tokens = tokens.into_iter().map(Into::into);
    let program = tokens.next().unwrap_or_else(|| OsString::from("ai"));
    let rest: Vec<OsString> = tokens.collect();

    if let [only] = rest.as_slice() {
        if INFO_FLAGS.iter().any(|flag| only == flag) {
            return vec![program, only.clone()];
        }
    }

    let mut flags = Vec::new();
    let mut words = Vec::new();
    for token in rest {
        let lower = token.to_string_lossy().to_lowercase();
        if KNOWN_FLAGS.contains(&lower.as_str()) {
            flags.push(OsString::from(lower));
            continue;
        }
        if looks_like_model_flag(&lower) {
            eprintln!(
                "Warning: Unknown flag '{}' is kept in the question. Valid model flags: --s, --p, --r, --deep",
                token.to_string_lossy()
            );
            warn!("Unknown flag {:?} kept in the question", token);
        }
        words.push(token);
    }

    let mut argv = Vec::with_capacity(flags.len() + words.len() + 2);
    argv.push(program);
    argv.extend(flags);
    argv.push(OsString::from("--"));
    argv.extend(words);
    argv
}

/// A short `--word`, likely a mistyped model flag rather than question text.
fn looks_like_model_flag(token: &str) -> bool {
    token.len() <= 7
        && token
            .strip_prefix("--")
            .and_then(|name| name.chars().next())
            .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Turn parsed arguments into a `QueryRequest`.
pub fn resolve(matches: &ArgMatches, config: &Config) -> Result<QueryRequest, ArgumentError> {
    let cli = Cli::from_arg_matches(matches)
        .map_err(|e| ArgumentError::Invalid(e.to_string()))?;

    let special_command = if cli.update {
        Some(SpecialCommand::Update)
    } else if cli.bored {
        Some(SpecialCommand::Bored)
    } else {
        None
    };

    let model_flag = last_model_flag(matches).unwrap_or(config.default_model);

    let (attachment_path, prompt_tokens) = match cli.query.split_first() {
        Some((first, rest)) => match detect_file_path(first) {
            Some(path) => (Some(path), rest),
            None => (None, cli.query.as_slice()),
        },
        None => (None, cli.query.as_slice()),
    };
    let prompt = build_prompt(prompt_tokens);

    if special_command.is_none() && prompt.is_empty() && attachment_path.is_none() {
        return Err(ArgumentError::EmptyQuery);
    }

    Ok(QueryRequest {
        prompt,
        attachment_path,
        model_flag,
        show_sources: cli.show_sources || config.show_sources,
        special_command,
    })
}

/// Pick the model flag given last on the command line.
fn last_model_flag(matches: &ArgMatches) -> Option<ModelFlag> {
    let given: Vec<(&str, ModelFlag)> = MODEL_FLAG_IDS
        .iter()
        .copied()
        .filter(|(id, _)| matches.value_source(id) == Some(ValueSource::CommandLine))
        .collect();

    let mut seen: Vec<(usize, ModelFlag)> = given
        .iter()
        .filter_map(|(id, flag)| {
            matches
                .indices_of(id)
                .and_then(|indices| indices.last())
                .map(|index| (index, *flag))
        })
        .collect();
    seen.sort_by_key(|(index, _)| *index);

    let occurrences: usize = given
        .iter()
        .map(|(id, _)| usize::from(matches.get_count(id)))
        .sum();
    if occurrences > 1 {
        let names: Vec<_> = seen.iter().map(|(_, f)| f.cli_flag()).collect();
        let used = seen.last().map(|(_, f)| f.cli_flag()).unwrap_or_default();
        eprintln!(
            "Warning: Multiple model flags provided ({}). Using the last one: {}",
            names.join(", "),
            used
        );
        warn!("Multiple model flags {:?}, using {}", names, used);
    }

    seen.last().map(|(_, flag)| *flag)
}

/// Return the expanded path if `token` names an existing, readable file.
fn detect_file_path(token: &str) -> Option<PathBuf> {
    let path = expand_tilde(token);
    if path.is_file() && std::fs::File::open(&path).is_ok() {
        Some(path)
    } else {
        None
    }
}

fn expand_tilde(token: &str) -> PathBuf {
    if token == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = token.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(token).to_path_buf()
}

/// Join the remaining tokens into the question.
fn build_prompt(tokens: &[String]) -> String {
    tokens.join(" ").trim().to_string()
}
