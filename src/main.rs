//!
//! sojobo server binary
//! --------------------
//! Loads configuration (defaults, optional JSON file, environment, then flags), builds
//! the shared gateway services and serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sojobo::bridge::{GatewayServices, TaskBridge};
use sojobo::charmstore::CharmStore;
use sojobo::config::GatewayConfig;
use sojobo::invoker::JujuCli;
use sojobo::permissions::JsonPermissionStore;
use sojobo::registry::ControllerRegistry;
use sojobo::remote::WsTransport;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

fn parse_port_arg(args: &[String], flag: &str) -> Result<Option<u16>> {
    match arg_value(args, flag) {
        Some(v) => v.parse::<u16>().map(Some).map_err(|_| anyhow!("{} expects a port number, got '{}'", flag, v)),
        None => Ok(None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

const USAGE: &str = "sojobo gateway\n\nUSAGE:\n  sojobo [--config FILE] [--http-port N]\n\nOPTIONS:\n  --config FILE    JSON settings file (env: SOJOBO_CONFIG; env vars override it)\n  --http-port N    HTTP API port (env: SOJOBO_HTTP_PORT, default 5000)\n\nREQUIRED ENV (or config file):\n  SOJOBO_API_KEY       api key, plain or an argon2 PHC string\n  JUJU_ADMIN_PASSWORD  administrator password\n";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config_file = arg_value(&args, "--config")
        .map(PathBuf::from)
        .or_else(|| std::env::var("SOJOBO_CONFIG").ok().map(PathBuf::from));
    let mut config = GatewayConfig::load(config_file.as_deref())?;
    if let Some(port) = parse_port_arg(&args, "--http-port")? {
        config.http_port = port;
    }

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "sojobo",
        "sojobo starting: RUST_LOG='{}', http_port={}, controllers='{}', permissions='{}', cli='{}'",
        rust_log,
        config.http_port,
        config.controllers_file.display(),
        config.permissions_file.display(),
        config.cli_binary
    );

    let registry = Arc::new(ControllerRegistry::from_file(&config.controllers_file)?);
    let store = Arc::new(JsonPermissionStore::open(&config.permissions_file)?);
    let runner = Arc::new(JujuCli::new(config.cli_binary.clone(), config.call_timeout()));
    let charms = CharmStore::new(&config.charm_store_url, config.call_timeout())?;
    let http_port = config.http_port;

    let services = Arc::new(GatewayServices {
        config,
        registry,
        store,
        transport: Arc::new(WsTransport::new()),
        runner,
        charms,
    });
    sojobo::server::serve(TaskBridge::new(services), http_port).await
}
