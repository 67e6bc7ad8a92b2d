//! smart-term - ask an AI model from your terminal.
//!
//! One invocation is one query: arguments are resolved, an optional file is
//! attached, the answer is streamed from the provider and rendered with its
//! citations.

mod args;
mod citations;
mod config;
mod error;
mod ingest;
mod models;
mod progress;
mod protocol;
mod provider;
mod render;
mod special;
mod stream;

use config::Config;
use error::Error;
use progress::ProgressIndicator;
use protocol::{AnswerResult, QueryRequest};
use provider::CompletionProvider;
use render::Renderer;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let tokens: Vec<OsString> = std::env::args_os().collect();
    if tokens.len() <= 1 {
        println!("{}", args::usage_banner());
        std::process::exit(1);
    }

    let config = Config::load();
    init_logging(&config);
    let renderer = Renderer::for_terminal(config.output_format);

    let request = match args::parse_matches(tokens).and_then(|m| args::resolve(&m, &config)) {
        Ok(request) => request,
        Err(e) => std::process::exit(report(&renderer, e.into())),
    };

    if let Some(command) = request.special_command {
        info!("Running special command {:?}", command);
        let code = match config::Config::install_dir()
            .and_then(|dir| special::run(command, &dir, &mut io::stdout()))
        {
            Ok(()) => 0,
            Err(e) => {
                error!("{:?} failed: {:#}", command, e);
                eprintln!("Error: {:#}", e);
                1
            }
        };
        std::process::exit(code);
    }

    let live = renderer.streams_live() && !request.show_sources && atty::is(atty::Stream::Stdout);
    let code = match ask(
        &request,
        &config,
        || provider::create_provider(&config),
        &renderer,
        &mut io::stdout(),
        &mut io::stderr(),
        live,
        interrupted(),
    )
    .await
    {
        Ok(_) => 0,
        Err(e) => report(&renderer, e),
    };
    std::process::exit(code);
}

/// Run one query through the pipeline and render the answer on `out`.
#[allow(clippy::too_many_arguments)]
async fn ask<F, C>(
    request: &QueryRequest,
    config: &Config,
    create_provider: F,
    renderer: &Renderer,
    out: &mut (dyn Write + Send),
    err: &mut dyn Write,
    live: bool,
    cancel: C,
) -> error::Result<AnswerResult>
where
    F: FnOnce() -> error::Result<Box<dyn CompletionProvider>>,
    C: Future<Output = ()>,
{
    let selection = request.model_flag.selection();

    let attachment = match &request.attachment_path {
        Some(path) => {
            let attachment = ingest::ingest(path, config.max_file_size_bytes())?;
            info!(
                "Attached {} ({}, {}, {} bytes)",
                path.display(),
                attachment.kind.as_str(),
                attachment.mime_type,
                attachment.size_bytes
            );
            if attachment.truncated {
                warn!("Attachment text was truncated to {}MB", config.max_file_size_mb);
            }
            Some(attachment)
        }
        None => None,
    };

    let echoed = attachment
        .as_ref()
        .map(|a| (a.source_path.as_path(), a.kind));
    let prompt = match (&attachment, request.prompt.is_empty()) {
        (Some(a), true) => a.kind.fallback_prompt(),
        _ => request.prompt.as_str(),
    };
    if let Err(e) = renderer.echo_query(err, prompt, echoed) {
        warn!("Failed to echo query: {}", e);
    }

    let provider = create_provider()?;
    let envelope = provider::build_envelope(request, attachment, selection, config.timeout);

    let indicator = ProgressIndicator::for_terminal(config.show_thinking_animation, selection.color);
    let live_out: Option<&mut (dyn Write + Send)> = if live { Some(&mut *out) } else { None };
    let streamed = stream::consume(provider.as_ref(), envelope, indicator, live_out, cancel).await?;

    let extraction = citations::extract(&streamed.text, &streamed.sources);
    info!(
        "Answer has {} citations from {} sources (shown: {})",
        extraction.citations.len(),
        streamed.sources.len(),
        request.show_sources
    );

    let answer = AnswerResult {
        full_text: extraction.text,
        citations: extraction.citations,
        model_used: selection.model_id.to_string(),
    };
    if let Err(e) = renderer.answer(&mut *out, &answer, selection, request.show_sources, live) {
        warn!("Failed to write answer: {}", e);
    }
    Ok(answer)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Print the error and return the exit code for it.
fn report(renderer: &Renderer, e: Error) -> i32 {
    error!("{}", e);
    let mut stderr = io::stderr();
    if matches!(e, Error::Cancelled) {
        let _ = writeln!(stderr);
    }
    let _ = renderer.error(&mut stderr, &e);
    e.exit_code()
}

/// Send logs to the installation log file. Logging stays off if the file
/// cannot be opened.
fn init_logging(config: &Config) {
    let Ok(path) = Config::log_path() else {
        return;
    };
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},reqwest=warn,hyper=warn,hyper_util=warn",
            config.log_level.as_directive()
        ))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
}
