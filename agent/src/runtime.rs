use crate::counters::CounterSet;
use crate::counters::global_counters;
use crate::report::render_report;
use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use axum::Router;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::error;
use tracing::info;
use tracing::warn;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2 * 60);
const HUB_TIMEOUT: Duration = Duration::from_secs(10);
const SIDECAR_SUFFIX: &str = "_profile_listen_addr";

/// How the embedded agent reaches the hub and serves its counters.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Base URL of the coverage hub.
    pub center: String,
    /// Service name advertised to the hub; the binary basename when unset.
    pub service: Option<String>,
    /// Fixed listen address (`host:port` or `:port`); when unset the agent
    /// re-binds its previous port if it can, else picks an ephemeral one.
    pub bind: Option<String>,
    /// Counting mode stamped on emitted profiles.
    pub mode: String,
    /// Serve counters only: no registration, keepalive, or teardown.
    pub singleton: bool,
    /// Source bytes per instrumented file, embedded by the build step and
    /// used for the HTML report.
    pub sources: HashMap<String, Vec<u8>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            center: "http://127.0.0.1:7777".to_string(),
            service: None,
            bind: None,
            mode: "atomic".to_string(),
            singleton: false,
            sources: HashMap::new(),
        }
    }
}

impl AgentConfig {
    pub(crate) fn service_name(&self) -> String {
        match &self.service {
            Some(name) if !name.is_empty() => name.clone(),
            _ => binary_basename(),
        }
    }

    fn center_url(&self, op: &str) -> String {
        format!("{}/v1/cover/{op}", self.center.trim_end_matches('/'))
    }
}

/// Starts the agent on its own thread with a dedicated runtime, so the
/// host binary does not have to be async. The thread lives for the rest of
/// the process; teardown runs only through the signal path.
///
/// The process exits non-zero when the agent cannot bind its listener or
/// register with the hub.
pub fn start(config: AgentConfig) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("failed to build coverage agent runtime: {err}");
                std::process::exit(1);
            }
        };
        runtime.block_on(async move {
            if let Err(err) = run(config).await {
                error!("coverage agent failed: {err:#}");
                std::process::exit(1);
            }
        });
    })
}

/// Runs the agent inside the caller's runtime until the server stops.
pub async fn run(config: AgentConfig) -> Result<()> {
    let (listener, host) = listen(&config).await?;
    let port = listener.local_addr()?.port();
    write_sidecar(&sidecar_path(), &host);

    let config = Arc::new(config);
    if !config.singleton {
        let address = format!("http://{host}");
        register_self(&config, &address)
            .await
            .context("register with coverage hub")?;
        tokio::spawn(keepalive_loop(config.clone(), address));
        #[cfg(unix)]
        tokio::spawn(watch_signals(config.clone(), port));
    }

    info!("coverage agent listening on {host}, port {port}");
    let app = router(config);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Binding policy: a configured address wins; otherwise try to rebind the
/// port recorded in the sidecar file; otherwise take an ephemeral port on
/// all interfaces.
async fn listen(config: &AgentConfig) -> Result<(TcpListener, String)> {
    if let Some(bind) = &config.bind {
        let bind = if bind.starts_with(':') {
            format!("0.0.0.0{bind}")
        } else {
            bind.clone()
        };
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("bind {bind}"))?;
        let host = advertised_host(listener.local_addr()?.port());
        return Ok((listener, host));
    }
    if let Some(previous) = read_sidecar(&sidecar_path()) {
        if let Some((_, port)) = previous.rsplit_once(':') {
            if let Ok(listener) = TcpListener::bind(format!("0.0.0.0:{port}")).await {
                return Ok((listener, previous));
            }
        }
    }
    let listener = TcpListener::bind("0.0.0.0:0")
        .await
        .context("bind ephemeral port")?;
    let host = advertised_host(listener.local_addr()?.port());
    Ok((listener, host))
}

/// The address other machines should use: the first non-loopback IPv4
/// interface when one exists, the loopback address otherwise.
fn advertised_host(port: u16) -> String {
    let mut loopback: Option<Ipv4Addr> = None;
    let mut routable: Option<Ipv4Addr> = None;
    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for interface in interfaces {
            let IpAddr::V4(ip) = interface.ip() else {
                continue;
            };
            if ip.is_loopback() {
                loopback.get_or_insert(ip);
            } else {
                routable.get_or_insert(ip);
            }
        }
    }
    let ip = routable
        .or(loopback)
        .unwrap_or(Ipv4Addr::LOCALHOST)
        .to_string();
    format!("{ip}:{port}")
}

/// Every IPv4 interface paired with the agent port, for deregistration.
fn all_interface_addresses(port: u16) -> Vec<String> {
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };
    interfaces
        .into_iter()
        .filter_map(|interface| match interface.ip() {
            IpAddr::V4(ip) => Some(format!("{ip}:{port}")),
            IpAddr::V6(_) => None,
        })
        .collect()
}

fn sidecar_path() -> PathBuf {
    let arg0 = std::env::args().next().unwrap_or_default();
    PathBuf::from(format!("{arg0}{SIDECAR_SUFFIX}"))
}

/// Failures here only cost the port-reuse optimization on the next start.
fn write_sidecar(path: &Path, host: &str) {
    if let Err(err) = std::fs::write(path, host) {
        warn!("failed to record listen address in {}: {err}", path.display());
    }
}

fn read_sidecar(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn binary_basename() -> String {
    let arg0 = std::env::args().next().unwrap_or_default();
    Path::new(&arg0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn register_self(config: &AgentConfig, address: &str) -> Result<String> {
    let query = [
        ("name", config.service_name()),
        ("address", address.to_string()),
    ];
    hub_post(config, "register", &query, None).await
}

async fn keepalive_loop(config: Arc<AgentConfig>, address: String) {
    loop {
        tokio::time::sleep(KEEPALIVE_INTERVAL).await;
        let query = [
            ("name", config.service_name()),
            ("address", address.clone()),
        ];
        if let Err(err) = hub_post(&config, "keepalive", &query, None).await {
            warn!("keepalive with coverage hub failed: {err:#}");
        }
    }
}

async fn deregister_self(config: &AgentConfig, addresses: &[String]) -> Result<String> {
    let body = serde_json::json!({ "address": addresses });
    hub_post(config, "remove", &[], Some(body)).await
}

/// POSTs to the hub with one transparent retry on transport errors.
async fn hub_post(
    config: &AgentConfig,
    op: &str,
    query: &[(&str, String)],
    body: Option<serde_json::Value>,
) -> Result<String> {
    let url = config.center_url(op);
    let client = reqwest::Client::new();
    let build = || {
        let mut request = client.post(&url).timeout(HUB_TIMEOUT);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }
        request
    };
    let resp = match build().send().await {
        Ok(resp) => resp,
        Err(err) if is_network_error(&err) => {
            warn!("hub request failed, trying again: {err}");
            build().send().await?
        }
        Err(err) => return Err(err.into()),
    };
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!("{op} with coverage hub failed: {status} - {text}"));
    }
    Ok(text)
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
}

/// Termination signals deregister every interface address and exit 0.
/// Hangup is ignored so log rotation scripts cannot kill the agent.
#[cfg(unix)]
async fn watch_signals(config: Arc<AgentConfig>, port: u16) {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let Ok(mut interrupt) = signal(SignalKind::interrupt()) else {
        return;
    };
    let Ok(mut quit) = signal(SignalKind::quit()) else {
        return;
    };
    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        return;
    };
    let Ok(mut hangup) = signal(SignalKind::hangup()) else {
        return;
    };
    loop {
        tokio::select! {
            _ = interrupt.recv() => break,
            _ = quit.recv() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => {
                info!("ignoring hangup");
            }
        }
    }

    let addresses: Vec<String> = all_interface_addresses(port)
        .into_iter()
        .map(|host| format!("http://{host}"))
        .collect();
    if let Err(err) = deregister_self(&config, &addresses).await {
        warn!("deregister from coverage hub failed: {err:#}");
    }
    std::process::exit(0);
}

#[derive(Clone)]
struct AgentState {
    config: Arc<AgentConfig>,
    counters: &'static CounterSet,
}

/// The agent's HTTP surface over the process-wide counter set.
pub fn router(config: Arc<AgentConfig>) -> Router {
    router_with_counters(config, global_counters())
}

/// Same surface over an explicit counter set.
pub fn router_with_counters(config: Arc<AgentConfig>, counters: &'static CounterSet) -> Router {
    let state = AgentState { config, counters };
    Router::new()
        .route("/v1/cover/coverage", get(coverage_handler))
        .route("/v1/cover/profile", get(profile_handler))
        .route("/v1/cover/clear", post(clear_handler))
        .route("/v1/cover/report", get(report_handler))
        .with_state(state)
}

async fn coverage_handler(State(state): State<AgentState>) -> String {
    if state.counters.block_count() == 0 {
        return "0".to_string();
    }
    format!("{:.6}", state.counters.coverage())
}

async fn profile_handler(State(state): State<AgentState>) -> String {
    state.counters.profile_text(&state.config.mode)
}

async fn clear_handler(State(state): State<AgentState>) -> String {
    state.counters.clear();
    "clear call successfully\n".to_string()
}

/// Pulls this service's merged profile back from the hub and renders the
/// annotated source for every file whose bytes were embedded at build time.
async fn report_handler(
    State(state): State<AgentState>,
    RawQuery(raw): RawQuery,
) -> Response {
    let (force, coverfile, skipfile) = parse_report_query(raw.as_deref().unwrap_or(""));
    let body = serde_json::json!({
        "service": [state.config.service_name()],
        "force": force,
        "coverfile": coverfile,
        "skipfile": skipfile,
    });
    let resp = match reqwest::Client::new()
        .post(state.config.center_url("profile"))
        .timeout(HUB_TIMEOUT)
        .json(&body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => return report_failure("failed to get cover file", err),
    };
    let status = resp.status();
    let text = match resp.text().await {
        Ok(text) => text,
        Err(err) => return report_failure("failed to get cover file", err),
    };
    if !status.is_success() {
        return report_failure("failed to get cover file", text);
    }
    match render_report(&text, &state.config.sources) {
        Ok(html) => Html(html).into_response(),
        Err(err) => report_failure("failed to gen cover report", format!("{err:#}")),
    }
}

fn report_failure(what: &str, err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{what}, err: {err}"),
    )
        .into_response()
}

fn parse_report_query(raw: &str) -> (bool, Vec<String>, Vec<String>) {
    let mut force = false;
    let mut coverfile = Vec::new();
    let mut skipfile = Vec::new();
    for part in raw.split('&').filter(|part| !part.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        let value = percent_decode_str(&value.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned();
        match key {
            "force" => force = value == "1" || value.eq_ignore_ascii_case("true"),
            "coverfile" => coverfile.push(value),
            "skipfile" => skipfile.push(value),
            _ => {}
        }
    }
    (force, coverfile, skipfile)
}
