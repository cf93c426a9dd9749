use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use flowlens_client::{ApiClient, ClientConfig, FlowSettings};
use flowlens_core::aggregate::{KNOWN_CATEGORIES, is_known_category};
use flowlens_core::cache::ResultCache;
use flowlens_core::classify::{is_public, strip_prefix};
use flowlens_core::pipeline::{FlowPipeline, PipelineOptions, RenderGuard, Selection};
use flowlens_core::report::{
    ReportFormat, generate_chord_json, generate_chord_text, generate_sankey_json,
    generate_sankey_text, save_report,
};
use flowlens_core::resolve::HostnameCache;
use flowlens_core::store::{KvStore, MemoryStore, SqliteStore};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, warn};
use url::Url;

const CACHE_DB_NAME: &str = "flowlens.db";
const MAX_PAIRS_SHOWN: usize = 25;

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub api: Url,
    /// The cache database file inside `--cache-dir`.
    pub cache_db: PathBuf,
    pub timeout: Duration,
    pub quiet: bool,
}

impl GlobalOptions {
    pub fn from_matches(args: &ArgMatches, quiet: bool) -> Result<Self> {
        let api = args
            .get_one::<Url>("api")
            .cloned()
            .ok_or_else(|| anyhow!("--api is required"))?;
        let cache_db = args
            .get_one::<String>("cache-dir")
            .map(|dir| resolve_cache_path(dir))
            .ok_or_else(|| anyhow!("--cache-dir is required"))?;
        let timeout = Duration::from_secs(args.get_one::<u64>("timeout").copied().unwrap_or(10));

        Ok(Self {
            api,
            cache_db,
            timeout,
            quiet,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.to_string(),
            timeout: self.timeout,
            ..ClientConfig::default()
        }
    }
}

// Helper functions

/// Map the `-v` count onto a log level. Warnings are always shown.
pub fn verbosity_level(count: u8) -> Level {
    match count {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Expand `~` and point at the cache database inside the directory.
pub fn resolve_cache_path(dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(dir);
    Path::new(expanded.as_ref()).join(CACHE_DB_NAME)
}

/// Parse a comma separated category list. Unknown names are kept (the backend
/// may know more than we do) but reported.
pub fn parse_categories(list: &str) -> Result<HashSet<String>, String> {
    let categories: HashSet<String> = list
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    if categories.is_empty() {
        return Err(format!(
            "No categories given, expected one or more of: {}",
            KNOWN_CATEGORIES.join(", ")
        ));
    }

    for category in categories.iter().filter(|c| !is_known_category(c)) {
        eprintln!("⚠️  Unknown category '{}', it will only match if the backend sends it", category);
    }

    Ok(categories)
}

/// Categories to graph: the command line wins, then the dashboard's saved
/// selection, then everything.
pub fn choose_categories(arg: Option<&String>, settings: &FlowSettings) -> Result<HashSet<String>, String> {
    if let Some(list) = arg {
        return parse_categories(list);
    }
    if !settings.categories.is_empty() {
        return parse_categories(&settings.categories.join(","));
    }
    Ok(HashSet::from(["all".to_string()]))
}

/// Open the durable result store, falling back to memory when the cache
/// directory cannot be used.
pub fn open_store(db_path: &Path) -> Arc<dyn KvStore> {
    if let Some(parent) = db_path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Could not create cache directory {}: {}", parent.display(), e);
        return Arc::new(MemoryStore::new());
    }

    match SqliteStore::new(db_path) {
        Ok(store) => {
            debug!("Using result cache at {}", db_path.display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("Could not open result cache {}: {}", db_path.display(), e);
            Arc::new(MemoryStore::new())
        }
    }
}

fn spinner(quiet: bool, message: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.to_string());
    spinner
}

fn selection_from(args: &ArgMatches) -> Result<Selection> {
    let device = args
        .get_one::<String>("device")
        .ok_or_else(|| anyhow!("--device is required"))?;
    let mut selection = Selection::device(device);
    if let Some(client) = args.get_one::<String>("client") {
        selection = selection.with_client(client);
    }
    Ok(selection)
}

fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

fn emit(content: &str, output: Option<&PathBuf>, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            save_report(content, path).with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!(
                    "{} Report saved to {}",
                    "✓".green().bold(),
                    path.display().to_string().bright_white()
                );
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Settings are advisory: if the backend cannot serve them we graph with
/// defaults rather than fail.
async fn load_settings(client: &ApiClient) -> FlowSettings {
    match client.settings().await {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Could not load flow settings, using defaults: {}", e);
            FlowSettings::default()
        }
    }
}

struct Session {
    pipeline: FlowPipeline<ApiClient, ApiClient>,
    selection: Selection,
}

async fn open_session(global: &GlobalOptions, args: &ArgMatches, limit: usize) -> Result<Session> {
    let client = ApiClient::new(global.client_config()).context("Invalid API configuration")?;
    let settings = load_settings(&client).await;

    let categories = choose_categories(args.try_get_one::<String>("categories").ok().flatten(), &settings)
        .map_err(|e| anyhow!(e))?;
    let no_dns = args.try_get_one::<bool>("no-dns").ok().flatten().copied().unwrap_or(false);
    let no_cache = args.try_get_one::<bool>("no-cache").ok().flatten().copied().unwrap_or(false);

    let resolve = settings.dns_resolution_enabled && !no_dns;
    let hostnames = Arc::new(HostnameCache::new(client.clone(), resolve));
    let results = ResultCache::new(open_store(&global.cache_db));

    let mut options = PipelineOptions {
        categories,
        limit,
        ..PipelineOptions::default()
    };
    if no_cache {
        options.result_ttl = Duration::ZERO;
    }

    let selection = selection_from(args)?;
    let pipeline = FlowPipeline::new(Arc::new(client), hostnames, results, options);
    pipeline.seed_devices(&selection).await;

    Ok(Session { pipeline, selection })
}

fn title_for(kind: &str, selection: &Selection) -> String {
    match &selection.client_ip {
        Some(client) => format!("{} · {} · {}", kind, selection.device_id, client),
        None => format!("{} · {}", kind, selection.device_id),
    }
}

// Handler functions

pub async fn handle_chord(global: &GlobalOptions, args: &ArgMatches) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(50);
    let session = open_session(global, args, limit).await?;

    let spinner = spinner(global.quiet, "Building chord diagram...");
    let view = session
        .pipeline
        .load_chord(&session.selection, &session.pipeline.options().categories, &RenderGuard::new())
        .await
        .context("Failed to load flows")?;
    spinner.finish_and_clear();

    let Some(view) = view else {
        bail!("Chord diagram was superseded by a newer load");
    };

    let content = match report_format(args) {
        ReportFormat::Text => generate_chord_text(&title_for("CHORD", &session.selection), &view, MAX_PAIRS_SHOWN),
        ReportFormat::Json => generate_chord_json(&view)?,
    };
    emit(&content, args.get_one::<PathBuf>("output"), global.quiet)
}

pub async fn handle_sankey(global: &GlobalOptions, args: &ArgMatches) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(50);
    let session = open_session(global, args, limit).await?;

    let spinner = spinner(global.quiet, "Building sankey diagram...");
    let view = session
        .pipeline
        .load_sankey(&session.selection, &session.pipeline.options().categories, &RenderGuard::new())
        .await
        .context("Failed to load flows")?;
    spinner.finish_and_clear();

    let Some(view) = view else {
        bail!("Sankey diagram was superseded by a newer load");
    };

    let content = match report_format(args) {
        ReportFormat::Text => generate_sankey_text(&title_for("SANKEY", &session.selection), &view),
        ReportFormat::Json => generate_sankey_json(&view)?,
    };
    emit(&content, args.get_one::<PathBuf>("output"), global.quiet)
}

pub async fn handle_overview(global: &GlobalOptions, args: &ArgMatches) -> Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(50);
    let session = open_session(global, args, limit).await?;

    let spinner = spinner(global.quiet, "Loading internal and internet traffic...");
    let overview = session.pipeline.load_overview(&session.selection).await;
    spinner.finish_and_clear();

    let format = report_format(args);
    let mut sections = Vec::new();
    let mut failures = 0;

    for (name, result) in [("INTERNAL", overview.internal), ("INTERNET", overview.internet)] {
        match result {
            Ok(Some(view)) => sections.push((name, view)),
            Ok(None) => debug!("{} view superseded", name),
            Err(e) => {
                failures += 1;
                eprintln!("{} {} traffic: {}", "✗".red().bold(), name.to_lowercase(), e);
            }
        }
    }
    if failures == 2 {
        bail!("Neither diagram could be loaded");
    }

    let content = match format {
        ReportFormat::Text => sections
            .iter()
            .map(|(name, view)| generate_chord_text(&title_for(name, &session.selection), view, MAX_PAIRS_SHOWN))
            .collect::<String>(),
        ReportFormat::Json => {
            let mut views = serde_json::Map::new();
            for (name, view) in &sections {
                views.insert(name.to_lowercase(), serde_json::to_value(view)?);
            }
            serde_json::to_string_pretty(&serde_json::Value::Object(views))?
        }
    };
    emit(&content, args.get_one::<PathBuf>("output"), global.quiet)
}

pub async fn handle_dns_status(global: &GlobalOptions) -> Result<()> {
    let client = ApiClient::new(global.client_config()).context("Invalid API configuration")?;
    let settings = client.settings().await.context("Failed to load flow settings")?;

    let state = if settings.dns_resolution_enabled {
        "enabled".green().bold()
    } else {
        "disabled".yellow().bold()
    };
    println!("Reverse DNS: {}", state);
    Ok(())
}

pub async fn handle_dns_toggle(global: &GlobalOptions, enable: bool) -> Result<()> {
    let client = ApiClient::new(global.client_config()).context("Invalid API configuration")?;
    let mut settings = client.settings().await.context("Failed to load flow settings")?;

    if settings.dns_resolution_enabled == enable {
        println!(
            "{} Reverse DNS already {}",
            "✓".green().bold(),
            if enable { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    settings.dns_resolution_enabled = enable;
    client
        .update_settings(&settings)
        .await
        .context("Failed to save flow settings")?;
    println!(
        "{} Reverse DNS {}",
        "✓".green().bold(),
        if enable { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub async fn handle_dns_lookup(global: &GlobalOptions, args: &ArgMatches) -> Result<()> {
    let ips: Vec<String> = args
        .get_many::<String>("IP")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let client = ApiClient::new(global.client_config()).context("Invalid API configuration")?;
    let cache = HostnameCache::new(client, true);

    let spinner = spinner(global.quiet, &format!("Resolving {} addresses...", ips.len()));
    let resolved = cache.lookup(&ips).await;
    spinner.finish_and_clear();

    for ip in &ips {
        let answer = match resolved.get(strip_prefix(ip.trim())) {
            Some(host) => host.bright_white().to_string(),
            None if !is_public(ip) => "(private or invalid, not resolved)".dimmed().to_string(),
            None => "(no answer)".yellow().to_string(),
        };
        println!("{:<18} {}", ip, answer);
    }
    Ok(())
}

pub fn handle_cache_clear(global: &GlobalOptions) -> Result<()> {
    if !SqliteStore::exists(&global.cache_db) {
        println!("{} No result cache at {}", "✓".green().bold(), global.cache_db.display());
        return Ok(());
    }

    let store = SqliteStore::new(&global.cache_db)
        .with_context(|| format!("Failed to open result cache {}", global.cache_db.display()))?;
    let removed = ResultCache::new(Arc::new(store)).clear();
    println!(
        "{} Removed {} cached results from {}",
        "✓".green().bold(),
        removed,
        global.cache_db.display().to_string().bright_white()
    );
    Ok(())
}

pub fn print_banner() {
    let banner = r#"
   ┌─┐┬  ┌─┐┬ ┬┬  ┌─┐┌┐┌┌─┐
   ├┤ │  │ ││││││  ├┤ │││└─┐
   └  ┴─┘└─┘└┴┘┴─┘└─┘┘└┘└─┘
"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "   {} {}\n",
        "traffic flow graphs".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
