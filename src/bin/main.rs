//! Walletlink CLI - inspect and manage the persisted wallet store
//!
//!   walletlink status            → active session, if any
//!   walletlink providers         → registered providers and availability
//!   walletlink profiles          → cached profiles, every identity
//!   walletlink keys [prefix]     → raw store keys
//!   walletlink end               → end the session and wipe wallet-scoped keys
//!   walletlink watch             → run the connection watcher until Ctrl+C
//!                                  (needs a reachable wallet backend)
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use walletlink::core::keys;
use walletlink::logging::init_logging;
use walletlink::store::read_json;
use walletlink::{
    install_signal_handlers, CoreConfig, Environment, FileStore, HeadlessEnvironment, KvStore, MemoryProfileRepository,
    NetworkTier, Profile, WalletCore,
};

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("walletlink {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some(cmd) => run(cmd, &opts).await,
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({ "error": format!("{e:#}") }), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    prefix: Option<String>,
    app: Option<String>,
    network: Option<String>,
    store: Option<String>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--app" | "-a" => opts.app = iter.next().cloned(),
                "--network" | "-n" => opts.network = iter.next().cloned(),
                "--store" | "-s" => opts.store = iter.next().cloned(),
                _ => positional.push(arg.clone()),
            }
        }

        let mut positional = positional.into_iter();
        opts.command = positional.next();
        opts.prefix = positional.next();
        opts
    }
}

fn print_usage() {
    println!(
        r#"walletlink - wallet session store inspector

USAGE:
    walletlink <command> [args] [options]

COMMANDS:
    status                  Active session (provider, address, age)
    providers               Registered providers and availability
    profiles                Cached profiles for every identity
    keys [prefix]           List store keys under prefix
    end                     End the session and wipe wallet-scoped state
    watch                   Run the connection watcher until interrupted
                            (refused when no wallet backend is reachable)

OPTIONS:
    --app, -a <name>        Application name (default: walletlink, env: WALLETLINK_APP)
    --network, -n <net>     mainnet|testnet (env: WALLETLINK_NETWORK)
    --store, -s <path>      Store file (default: <data dir>/<app>/data/store.json)

OUTPUT OPTIONS:
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

ENVIRONMENT:
    WALLETLINK_ROOT         Root for the default store path
    WALLETLINK_LOG_JSON=1   JSON log lines on stderr
    RUST_LOG                Log filter (default: warn,walletlink=info)
"#
    );
}

fn load_config(opts: &ParsedArgs) -> Result<CoreConfig> {
    let app = opts
        .app
        .clone()
        .or_else(|| env::var("WALLETLINK_APP").ok())
        .unwrap_or_else(|| "walletlink".to_string());
    let mut config = CoreConfig::new(app).from_env();
    if let Some(network) = opts.network.as_deref() {
        config.network = NetworkTier::from_str(network).ok_or_else(|| anyhow!("unknown network: {network}"))?;
    }
    Ok(config)
}

fn open_store(opts: &ParsedArgs, config: &CoreConfig) -> Result<Arc<FileStore>> {
    let path = opts.store.as_ref().map(PathBuf::from).unwrap_or_else(|| FileStore::default_path(&config.app));
    debug!(path = %path.display(), "opening store");
    let store = FileStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run(cmd: &str, opts: &ParsedArgs) -> Result<Value> {
    let config = load_config(opts)?;
    let store = open_store(opts, &config)?;
    let env: Arc<dyn Environment> = Arc::new(HeadlessEnvironment);
    let core = WalletCore::new(config, env.clone(), store.clone(), Arc::new(MemoryProfileRepository::new()));

    match cmd {
        "status" => cmd_status(&core).await,
        "providers" => cmd_providers(&core).await,
        "profiles" => cmd_profiles(&*store),
        "keys" | "ls" => cmd_keys(&*store, opts.prefix.as_deref().unwrap_or("")),
        "end" => cmd_end(&core).await,
        "watch" => cmd_watch(&core, &*env).await,
        other => Err(anyhow!("Unknown command: {other}")),
    }
}

async fn cmd_status(core: &WalletCore) -> Result<Value> {
    let persisted = core.sessions().persisted_session()?;
    let expired = persisted.as_ref().map_or(false, |s| core.sessions().is_expired(s));
    core.restore().await?;
    let Some(session) = core.sessions().current_session() else {
        return Ok(json!({ "connected": false, "expired": expired }));
    };
    Ok(json!({
        "connected": true,
        "provider": session.provider,
        "address": session.address,
        "started_at": session.started_at,
        "age_secs": session.age_at(chrono::Utc::now()).as_secs(),
        "network": core.config().network.as_str(),
    }))
}

async fn cmd_providers(core: &WalletCore) -> Result<Value> {
    let available = core.registry().available().await;
    let providers: Vec<Value> = core
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| {
            let is_available = available.contains(&d.id);
            json!({ "descriptor": d, "available": is_available })
        })
        .collect();
    Ok(json!({ "providers": providers }))
}

fn cmd_profiles(store: &dyn KvStore) -> Result<Value> {
    let mut profiles = Vec::new();
    for key in store.keys(keys::profile::CACHE_PREFIX)? {
        if let Some(profile) = read_json::<Profile>(store, &key)? {
            profiles.push(profile);
        }
    }
    Ok(json!({ "count": profiles.len(), "profiles": profiles }))
}

fn cmd_keys(store: &dyn KvStore, prefix: &str) -> Result<Value> {
    let keys = store.keys(prefix)?;
    Ok(json!({ "prefix": prefix, "count": keys.len(), "keys": keys }))
}

async fn cmd_end(core: &WalletCore) -> Result<Value> {
    core.restore().await?;
    let ended = core.disconnect().await;
    Ok(json!({ "ended": ended }))
}

/// Verification needs a live backend; without one the first check would end
/// the stored session.
async fn cmd_watch(core: &WalletCore, env: &dyn Environment) -> Result<Value> {
    if !env.has_backends() {
        return Err(anyhow!("watch needs a wallet backend; none is reachable from this process"));
    }
    let restored = core.restore().await?;
    info!(connected = restored.is_some(), "watching connection");

    let signals = install_signal_handlers();
    let handle = core.start();
    let mut stop = signals.subscribe();
    let _ = stop.recv().await;
    core.shutdown();
    handle.await.context("watcher task")?;

    let status = core.watcher().status();
    Ok(json!({ "stopped": true, "status": status }))
}
