//! `fetchgate` downloads URLs through the `fetchgate-lib` scheduler.
//!
//! Every URL is fetched at most once, fetches to the same host are rate
//! limited together, and at most `--concurrency` fetches run at a time.
//! The outcome of each URL is printed as soon as it arrives:
//!
//! ```sh
//! fetchgate https://image.tmdb.org/t/p/w342/poster.jpg https://api.rawg.io/api/games
//! ```
//!
//! Local files work too:
//! ```sh
//! fetchgate file:///usr/share/fetchgate/placeholder.png
//! ```
//!
//! JSON lines, for scripts:
//! ```sh
//! fetchgate --format json -vv https://example.com/
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::collections::HashMap;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Error, Result, bail};
use bytes::Bytes;
use clap::{Parser, crate_version};
use fetchgate_lib::{
    FetchContext, HttpFetcherBuilder, RequestKey, Scheduled, Scheduler, TaskId, fs::read_asset,
};
use log::{debug, error, info};
use serde_json::json;
use url::Url;

mod logging;
mod options;
mod verbosity;

use crate::logging::init_logging;
use crate::options::{Config, FETCHGATE_CONFIG_FILE, FetchOptions, OutputFormat};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    FetchFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<FetchOptions> {
    let mut opts = FetchOptions::parse();

    init_logging(&opts.config.verbose);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, an invalid default file in the
        // current directory is still an error
        let default_config = PathBuf::from(FETCHGATE_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call fetchgate entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config (fetchgate {}): {e}", crate_version!());
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Fetch every URL and print the outcomes
async fn run(opts: &FetchOptions) -> Result<i32> {
    let ctx = FetchContext::new(opts.config.fetch_config());
    ctx.busy().subscribe(|busy| {
        if busy {
            info!("Fetching");
        } else {
            info!("All fetches done");
        }
    });

    let fetcher = HttpFetcherBuilder::from(ctx.config())
        .with_user_agent(opts.config.user_agent.clone())
        .fetcher()?;
    let (scheduler, mut inbox) = Scheduler::<Bytes>::new(&ctx);

    let mut printer = Printer::new(opts.config.format);
    let mut pending: HashMap<TaskId, &Url> = HashMap::new();

    for url in &opts.urls {
        let key = RequestKey::from(url);
        let scheduled = if url.scheme() == "file" {
            let Ok(path) = url.to_file_path() else {
                bail!("Cannot convert `{url}` to a local path");
            };
            scheduler.schedule(key, move || read_asset(path))
        } else {
            let fetcher = fetcher.clone();
            let target = url.clone();
            scheduler.schedule(key, move || async move { fetcher.get_bytes(&target).await })
        };

        match scheduled {
            Scheduled::Cached(bytes) => {
                debug!("{url} answered from cache");
                printer.print(url, &Ok(bytes))?;
            }
            Scheduled::Pending(handle) => {
                pending.insert(handle.id(), url);
            }
        }
    }

    while !pending.is_empty() {
        let Some(delivery) = inbox.recv().await else {
            break;
        };
        if let Some(url) = pending.remove(&delivery.id) {
            printer.print(url, &delivery.outcome)?;
        }
    }

    let stats = scheduler.stats();
    debug!(
        "{} fetched, {} shared an in-flight fetch, {} cache hits",
        stats.fetches, stats.coalesced, stats.hits
    );
    ctx.shutdown();

    let exit_code = if printer.failures > 0 {
        ExitCode::FetchFailure
    } else {
        ExitCode::Success
    };
    Ok(exit_code as i32)
}

/// Writes one line per outcome to stdout
struct Printer {
    format: OutputFormat,
    failures: usize,
}

impl Printer {
    const fn new(format: OutputFormat) -> Self {
        Self {
            format,
            failures: 0,
        }
    }

    fn print(&mut self, url: &Url, outcome: &fetchgate_lib::Result<Bytes>) -> Result<()> {
        if outcome.is_err() {
            self.failures += 1;
        }

        let line = match (self.format, outcome) {
            (OutputFormat::Json, Ok(bytes)) => {
                json!({ "url": url.as_str(), "status": "ok", "bytes": bytes.len() }).to_string()
            }
            (OutputFormat::Json, Err(e)) => {
                json!({ "url": url.as_str(), "status": "error", "error": e.to_string() }).to_string()
            }
            (_, Ok(bytes)) => format!("[OK] {url} ({} bytes)", bytes.len()),
            (_, Err(e)) => format!("[ERR] {url}: {e}"),
        };

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")?;
        Ok(())
    }
}
