mod cli;

use streamsweep::config::{self, Config};
use streamsweep::identity::{
    HttpMappingSource, IdentityResolver, JsonFileStore, MappingSource, NoRemote, ResolverSettings,
};
use streamsweep::scanner::{
    EngineSettings, RetryRequest, ScanEngine, ScanEvent, ScanRequest, ScanSession, SessionOutcome,
    ValidationRequest,
};
use streamsweep_common::{AddressTemplate, ScanRecord};
use streamsweep_probe::{FfprobeProber, RequestHeaders};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Per-session overrides shared by `scan` and `validate`.
#[derive(Default)]
struct RunOptions {
    workers: Option<usize>,
    timeout: Option<Duration>,
    headers: Option<RequestHeaders>,
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "streamsweep=debug,streamsweep_probe=debug,streamsweep_common=debug".to_string()
        } else {
            "streamsweep=info,streamsweep_probe=warn".to_string()
        }
    });

    // Logs go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Scan {
            template,
            workers,
            timeout_ms,
            user_agent,
            referer,
            retry,
            loop_mode,
            json,
        } => {
            let config = config::load_config_or_default(config_path)?;
            let headers = (user_agent.is_some() || referer.is_some()).then(|| RequestHeaders {
                user_agent: user_agent.or_else(|| config.probe.user_agent.clone()),
                referer: referer.or_else(|| config.probe.referer.clone()),
            });
            let options = RunOptions {
                workers,
                timeout: timeout_ms.map(Duration::from_millis),
                headers,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(scan(&config, template, options, retry || loop_mode, loop_mode))
        }
        Commands::Validate {
            file,
            workers,
            timeout_ms,
            json,
        } => {
            let config = config::load_config_or_default(config_path)?;
            let addresses = read_addresses(&file)?;
            let options = RunOptions {
                workers,
                timeout: timeout_ms.map(Duration::from_millis),
                headers: None,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(validate(&config, addresses, options))
        }
        Commands::Expand { template, limit } => expand(&template, limit),
        Commands::Lookup { raw_name } => {
            let config = config::load_config_or_default(config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(lookup(&config, &raw_name))
        }
        Commands::Map {
            raw_name,
            standard_name,
            logo,
            group,
        } => {
            let config = config::load_config_or_default(config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let resolver = build_resolver(&config).await?;
                resolver.add_user_mapping(&raw_name, &standard_name, logo.as_deref(), group.as_deref())?;
                println!("{} -> {}", raw_name, standard_name);
                Ok(())
            })
        }
        Commands::Unmap { standard_name } => {
            let config = config::load_config_or_default(config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let resolver = build_resolver(&config).await?;
                if resolver.remove_user_mapping(&standard_name)? {
                    println!("Removed mapping for {}", standard_name);
                } else {
                    println!("No user mapping named {}", standard_name);
                }
                Ok(())
            })
        }
        Commands::RefreshMappings { url } => {
            let mut config = config::load_config_or_default(config_path)?;
            if let Some(url) = &url {
                config.mappings.remote_url = url.clone();
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(refresh_mappings(&config))?;

            if let Some(url) = url {
                match config_path {
                    Some(path) => {
                        config::persist::update_remote_url(path, &url)?;
                        println!("Saved remote_url to {:?}", path);
                    }
                    None => println!("No --config given; the URL was used once and not saved"),
                }
            }
            Ok(())
        }
        Commands::Unstable { json } => {
            let config = config::load_config_or_default(config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(unstable(&config, json))
        }
        Commands::CheckTools => {
            let config = config::load_config_or_default(config_path)?;
            check_tools(&config)
        }
        Commands::Version => {
            println!("streamsweep {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn build_resolver(config: &Config) -> Result<Arc<IdentityResolver>> {
    let mappings = &config.mappings;
    let store = Arc::new(JsonFileStore::new(mappings.resolved_data_dir()));
    let source: Arc<dyn MappingSource> = match mappings.remote_url() {
        Some(url) => Arc::new(HttpMappingSource::new(url, mappings.fetch_timeout())),
        None => Arc::new(NoRemote),
    };

    let resolver = IdentityResolver::load(
        store,
        source,
        ResolverSettings {
            cache_ttl: mappings.cache_ttl(),
        },
    )
    .await
    .context("Failed to load channel mappings")?;

    Ok(Arc::new(resolver))
}

async fn build_engine(config: &Config) -> Result<ScanEngine> {
    let prober = FfprobeProber::discover(config.probe.settings()).context("ffprobe is required for probing")?;
    let resolver = build_resolver(config).await?;
    Ok(ScanEngine::new(
        Arc::new(prober),
        resolver,
        EngineSettings::from_config(config),
    ))
}

async fn scan(config: &Config, template: String, options: RunOptions, retry: bool, loop_mode: bool) -> Result<()> {
    // Reject a bad template before touching ffprobe or the mapping store.
    AddressTemplate::parse(&template)?;
    let engine = build_engine(config).await?;

    let mut request = ScanRequest::new(template);
    request.workers = options.workers;
    request.timeout = options.timeout;
    request.headers = options.headers.clone();

    let session = engine.start_scan(request)?;
    let outcome = watch_session(&engine, session, options.json).await?;

    if retry && outcome == SessionOutcome::Completed {
        let candidates = engine.retry_candidates();
        if candidates.is_empty() {
            tracing::info!("Nothing to retry");
        } else {
            let mut request = RetryRequest::new(candidates);
            request.loop_mode = loop_mode;
            request.workers = options.workers;
            request.timeout = options.timeout;
            request.headers = options.headers.clone();

            let session = engine.start_retry(request)?;
            watch_session(&engine, session, options.json).await?;
        }
        engine.close_retry_session();
    }

    Ok(())
}

async fn validate(config: &Config, addresses: Vec<String>, options: RunOptions) -> Result<()> {
    let engine = build_engine(config).await?;

    let mut request = ValidationRequest::new(addresses);
    request.workers = options.workers;
    request.timeout = options.timeout;

    let session = engine.start_validation(request)?;
    watch_session(&engine, session, options.json).await?;
    Ok(())
}

/// Print a session's events until its stream closes. Ctrl-C cancels the session.
async fn watch_session(engine: &ScanEngine, mut session: ScanSession, json: bool) -> Result<SessionOutcome> {
    let mut printer = RecordPrinter::new(json);
    let mut outcome = None;
    let mut interrupted = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = session.events.recv() => match event {
                Some(event) => {
                    if let ScanEvent::Completed(summary) = &event {
                        outcome = Some(summary.outcome.clone());
                    }
                    printer.event(event)?;
                }
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("\nCancelling...");
                engine.cancel(&session.handle);
            }
        }
    }

    printer.finish()?;
    outcome.context("Session ended without completing")
}

/// Line-oriented output: text rows or JSON events.
struct RecordPrinter {
    json: bool,
    pending: HashMap<String, ScanRecord>,
    out: std::io::Stdout,
}

impl RecordPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            pending: HashMap::new(),
            out: std::io::stdout(),
        }
    }

    fn event(&mut self, event: ScanEvent) -> Result<()> {
        if self.json {
            if !matches!(event, ScanEvent::Progress { .. }) {
                writeln!(self.out.lock(), "{}", serde_json::to_string(&event)?)?;
            }
            return Ok(());
        }

        match event {
            ScanEvent::Record(record) if record.valid => {
                self.pending.insert(record.address.clone(), record);
            }
            ScanEvent::Record(record) => self.row(&record)?,
            ScanEvent::RecordUpdated(update) => {
                if let Some(mut record) = self.pending.remove(&update.address) {
                    record.apply(&update);
                    self.row(&record)?;
                }
            }
            ScanEvent::Stats(stats) => eprint!("\r{}", stats),
            ScanEvent::RetryPassCompleted(pass) => eprintln!(
                "\nRetry pass {}: {} attempted, {} recovered, {} still failing",
                pass.iteration, pass.attempted, pass.new_valid, pass.still_failing
            ),
            ScanEvent::Completed(summary) => eprintln!(
                "\n{} {:?}: {}",
                summary.kind, summary.outcome, summary.stats
            ),
            ScanEvent::Started { .. } | ScanEvent::Progress { .. } => {}
        }
        Ok(())
    }

    fn row(&self, record: &ScanRecord) -> Result<()> {
        let mut out = self.out.lock();
        if record.valid {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}ms",
                record.address,
                record.resolved_name,
                record.group.as_deref().unwrap_or("-"),
                record.resolution.as_deref().unwrap_or("-"),
                record.latency_ms.unwrap_or_default()
            )?;
        } else {
            writeln!(
                out,
                "{}\tINVALID\t{}",
                record.address,
                record.error.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }

    /// Print records whose enrichment never arrived.
    fn finish(&mut self) -> Result<()> {
        let mut rest: Vec<ScanRecord> = self.pending.drain().map(|(_, r)| r).collect();
        rest.sort_by(|a, b| a.address.cmp(&b.address));
        for record in &rest {
            self.row(record)?;
        }
        Ok(())
    }
}

/// One address per line; blank lines and `#` lines are skipped.
fn read_addresses(file: &Path) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(std::io::BufReader::new(std::io::stdin()))
    } else {
        let f = std::fs::File::open(file).with_context(|| format!("Failed to open {:?}", file))?;
        Box::new(std::io::BufReader::new(f))
    };

    let mut addresses = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        addresses.push(line.to_string());
    }
    Ok(addresses)
}

fn expand(template: &str, limit: Option<u64>) -> Result<()> {
    let template = AddressTemplate::parse(template)?;
    if let Some(count) = template.combinations() {
        tracing::info!(combinations = %count, "Expanding template");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0u64;
    'batches: for batch in template.batches(1024) {
        for address in batch {
            if limit.is_some_and(|limit| printed >= limit) {
                break 'batches;
            }
            writeln!(out, "{}", address)?;
            printed += 1;
        }
    }
    Ok(())
}

async fn lookup(config: &Config, raw_name: &str) -> Result<()> {
    let resolver = build_resolver(config).await?;
    match resolver.lookup(raw_name) {
        Some(identity) => {
            println!("{}", identity.standard_name);
            if let Some(group) = &identity.group {
                println!("  group: {}", group);
            }
            if let Some(logo) = &identity.logo {
                println!("  logo: {}", logo);
            }
        }
        None => {
            println!("No mapping for {:?}", raw_name);
            let suggestions = resolver.mapping_suggestions(raw_name);
            if !suggestions.is_empty() {
                println!("Seen as: {}", suggestions.join(", "));
            }
        }
    }
    Ok(())
}

async fn refresh_mappings(config: &Config) -> Result<()> {
    let resolver = build_resolver(config).await?;
    let count = resolver
        .refresh_remote_mappings()
        .await
        .context("Failed to refresh remote mappings")?;
    println!("Loaded {} remote mappings", count);
    Ok(())
}

async fn unstable(config: &Config, json: bool) -> Result<()> {
    let resolver = build_resolver(config).await?;
    let mut unstable = resolver.unstable_mappings();
    unstable.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

    for mapping in &unstable {
        if json {
            println!("{}", serde_json::to_string(mapping)?);
        } else {
            println!(
                "{}\t{}\t{}\t{} observations",
                &mapping.fingerprint[..12.min(mapping.fingerprint.len())],
                mapping.address,
                mapping.names.join(" | "),
                mapping.count
            );
        }
    }
    if !json && unstable.is_empty() {
        println!("No unstable mappings");
    }
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = streamsweep_probe::check_tools(config.probe.ffprobe_path.as_deref());
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffprobe is missing. Install FFmpeg to enable scanning.");
    }

    Ok(())
}
