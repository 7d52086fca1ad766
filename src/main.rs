//! ringfence: robocall screening daemon.
//!
//! This is the daemon entry point. It parses CLI arguments, brings the
//! modem up into voice + caller-ID mode, assembles the filter set, and then
//! runs two long-lived tasks beside the modem worker: the call screener and
//! the call-log web server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ringfence::{
    cli::Cli,
    config::ConnectString,
    filter::{Action, ExecFilter, Filter, FilterSet, LocalFilter, ReputationFilter},
    journal::CallJournal,
    modem::{CallerIdMode, FaxClass, Modem},
    screen::Screener,
    web::{WebConfig, WebServer},
};
use tokio::sync::watch;
use tracing::{debug, info};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    debug!("parsed CLI arguments: {:?}", cli);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    rt.block_on(run(cli))
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let conn = ConnectString::parse(&cli.connect).context("Failed to parse connect string")?;

    let filters = Arc::new(build_filters(&cli).context("Failed to load filters")?);
    info!(filters = filters.len(), "filter set assembled");

    let journal = Arc::new(
        CallJournal::load(&cli.call_log)
            .with_context(|| format!("Failed to load call log {}", cli.call_log.display()))?,
    );

    let (modem, calls) = Modem::open(&conn).context("Failed to open modem")?;

    // The screener consumes calls from here on; start it before the modem
    // is told to report caller-ID.
    let screener = Screener::new(modem.clone(), filters, journal.clone());
    let screener_handle = tokio::spawn(screener.run(calls));

    // The info/fax-class attributes are queried twice during bring-up; go
    // to the wire both times so a flaky modem is caught early.
    modem.set_cache_enabled(false);

    configure_modem(&modem).await.context("Failed to configure modem")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let server = WebServer::new(
        WebConfig {
            listen: cli.listen,
            long_poll: cli.long_poll,
        },
        journal,
        shutdown_rx,
    );
    server.run().await.context("Web server failed")?;

    drop(modem);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), screener_handle).await;
    Ok(())
}

/// Bring the modem into the state the screener relies on: known-good after
/// reset, fax class 2, caller-ID reporting on.
async fn configure_modem(modem: &Modem) -> Result<()> {
    modem.reset().await.context("reset failed")?;

    let infos = modem.info().await.context("info query failed")?;
    info!("modem info:");
    for line in &infos {
        info!("  {line}");
    }

    let classes = modem.fax_classes().await.context("fax class query failed")?;
    info!(?classes, "fax classes");
    info!(class = %modem.fax_class().await.context("fax class read failed")?, "fax class");

    modem
        .set_fax_class(FaxClass::Class2)
        .await
        .context("fax class set failed")?;
    info!(class = %modem.fax_class().await.context("fax class re-read failed")?, "fax class");

    let modes = modem
        .caller_id_modes()
        .await
        .context("caller-ID mode query failed")?;
    info!(?modes, "caller ID modes");
    info!(mode = %modem.caller_id_mode().await.context("caller-ID mode read failed")?, "caller ID mode");

    modem
        .set_caller_id_mode(CallerIdMode::On)
        .await
        .context("caller-ID enable failed")?;
    info!(mode = %modem.caller_id_mode().await.context("caller-ID mode re-read failed")?, "caller ID mode");

    Ok(())
}

/// Assemble the filter set from the CLI flags, in the order the flags are
/// documented: block patterns, allow patterns, reputation lookup, exec.
fn build_filters(cli: &Cli) -> Result<FilterSet> {
    let mut filters: Vec<Arc<dyn Filter>> = Vec::new();

    if let Some(path) = &cli.block {
        let filter = LocalFilter::load(path, Action::Block, Action::Allow)
            .with_context(|| format!("Failed to load block file {}", path.display()))?;
        info!(path = %path.display(), rules = filter.len(), "block filter loaded");
        filters.push(Arc::new(filter));
    }

    if let Some(path) = &cli.allow {
        let filter = LocalFilter::load(path, Action::Allow, Action::Allow)
            .with_context(|| format!("Failed to load allow file {}", path.display()))?;
        info!(path = %path.display(), rules = filter.len(), "allow filter loaded");
        filters.push(Arc::new(filter));
    }

    if let (Some(account), Some(secret)) = (&cli.rep_account, &cli.rep_secret) {
        let filter =
            ReputationFilter::new(account, secret).min_spam_confidence(cli.rep_min_confidence);
        info!(min_confidence = cli.rep_min_confidence, "reputation filter enabled");
        filters.push(Arc::new(filter));
    }

    if let Some(command) = &cli.exec {
        info!(%command, args = %cli.exec_args, "exec filter enabled");
        filters.push(Arc::new(ExecFilter::new(command, &cli.exec_args)));
    }

    Ok(FilterSet::new(filters))
}
