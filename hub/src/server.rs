use crate::collect::collect_profiles;
use crate::collect::resolve_addresses;
use crate::liveness::Liveness;
use crate::liveness::spawn_liveness_sweeper;
use crate::metrics_store::MetricsStore;
use crate::proto::ProfileRequest;
use crate::proto::ServiceUnderTest;
use crate::proto::query_pairs;
use crate::sampler::spawn_metrics_sampler;
use crate::store::FileStore;
use crate::store::MemoryStore;
use crate::store::ServiceRegistry;
use crate::store::StoreError;
use crate::unix_now;
use crate::worker::Worker;
use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::Query;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const TIMELINE_TEMPLATE: &str = include_str!("../assets/report.html");

#[derive(Clone, Debug, Default)]
pub struct HubOptions {
    /// Listen port; 0 picks an ephemeral one.
    pub port: u16,
    /// Snapshot path for the file-backed registry; in-memory when absent.
    pub store_path: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<dyn ServiceRegistry>,
    liveness: Arc<Liveness>,
    metrics: Arc<MetricsStore>,
}

/// Runs the coverage hub until the server errors out.
///
/// Registered addresses reloaded from a snapshot are seeded into the
/// liveness set so a hub restart does not evict everything at once.
pub async fn run_hub(opts: HubOptions) -> Result<()> {
    let registry: Arc<dyn ServiceRegistry> = match &opts.store_path {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let liveness = Arc::new(Liveness::new());
    let now = unix_now();
    for addresses in registry.get_all().into_values() {
        for address in addresses {
            liveness.touch(&address, now);
        }
    }
    let metrics = Arc::new(MetricsStore::new());

    spawn_liveness_sweeper(liveness.clone(), registry.clone());
    spawn_metrics_sampler(registry.clone(), metrics.clone());

    let app = hub_router(registry, liveness, metrics);
    let listener = TcpListener::bind(("0.0.0.0", opts.port)).await?;
    info!("coverage hub listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn hub_router(
    registry: Arc<dyn ServiceRegistry>,
    liveness: Arc<Liveness>,
    metrics: Arc<MetricsStore>,
) -> Router {
    let state = AppState {
        registry,
        liveness,
        metrics,
    };
    Router::new()
        .route("/v1/cover/register", post(register_service))
        .route("/v1/cover/keepalive", post(register_service))
        .route("/v1/cover/profile", get(profile).post(profile))
        .route("/v1/cover/clear", post(clear))
        .route("/v1/cover/init", post(init_system))
        .route("/v1/cover/list", get(list_services))
        .route("/v1/cover/remove", post(remove_services))
        .route("/v1/cover/report", get(cover_report))
        .route("/v1/cover/metrics", get(service_metrics))
        .route("/goc-coverage-report", get(timeline_report))
        .with_state(state)
}

async fn register_service(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut service = decode_service(raw.as_deref(), &headers, &body)
        .ok_or_else(|| AppError::bad_request("missing service name or address"))?;

    let (scheme, host, port) = match split_scheme_host_port(&service.address) {
        Some((scheme, host, port)) => {
            (scheme.to_string(), host.to_string(), port.to_string())
        }
        None => {
            return Err(AppError::bad_request(format!(
                "invalid address {}",
                service.address
            )));
        }
    };
    // IPv4 sources only: when the reported host differs from the peer the
    // request actually came from, trust the socket.
    if let IpAddr::V4(real_ip) = peer.ip() {
        if host != real_ip.to_string() {
            info!(
                "registered host {host} of service {} differs from the observed {real_ip}, using the observed one",
                service.name
            );
            service.address = format!("{scheme}://{real_ip}:{port}");
        }
    }

    if !state.registry.get(&service.name).contains(&service.address) {
        match state.registry.add(&service.name, &service.address) {
            Ok(()) | Err(StoreError::AlreadyRegistered) => {}
            Err(err) => return Err(AppError::internal(err)),
        }
    }
    state.liveness.touch(&service.address, unix_now());
    Ok(Json(serde_json::json!({"result": "success"})))
}

async fn list_services(State(state): State<AppState>) -> Response {
    Json(state.registry.get_all()).into_response()
}

async fn profile(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = decode_profile_request(raw.as_deref(), &headers, &body)
        .map_err(AppError::expectation_failed)?;
    let all = state.registry.get_all();
    let addresses = resolve_addresses(&request.service, &request.address, request.force, &all)
        .map_err(AppError::expectation_failed)?;
    let merged = collect_profiles(
        &addresses,
        request.force,
        &request.coverfile,
        &request.skipfile,
    )
    .await
    .map_err(AppError::internal)?;

    let mut out = String::new();
    covhub_profile::emit_profiles(&merged, &mut out).map_err(AppError::internal)?;
    Ok(out.into_response())
}

async fn clear(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = decode_profile_request(raw.as_deref(), &headers, &body)
        .map_err(AppError::expectation_failed)?;
    let all = state.registry.get_all();
    let addresses = resolve_addresses(&request.service, &request.address, true, &all)
        .map_err(AppError::expectation_failed)?;

    let mut out = String::new();
    for address in &addresses {
        let reply = Worker::new(address)
            .clear()
            .await
            .map_err(AppError::expectation_failed)?;
        let _ = write!(out, "Register service {address} coverage counter {reply}");
    }
    Ok(out.into_response())
}

async fn init_system(State(state): State<AppState>) -> Result<Json<&'static str>, AppError> {
    state.registry.init().map_err(AppError::internal)?;
    Ok(Json(""))
}

async fn remove_services(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = decode_profile_request(raw.as_deref(), &headers, &body)
        .map_err(AppError::expectation_failed)?;
    let all = state.registry.get_all();
    let addresses = resolve_addresses(&request.service, &request.address, true, &all)
        .map_err(AppError::expectation_failed)?;

    let mut out = String::new();
    for address in &addresses {
        state
            .registry
            .remove(address)
            .map_err(AppError::expectation_failed)?;
        let _ = write!(out, "Register service {address} removed from the center.");
    }
    Ok(out.into_response())
}

async fn cover_report(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, AppError> {
    let raw = raw.unwrap_or_default();
    let pairs = query_pairs(&raw);
    let module = first_value(&pairs, "module")
        .ok_or_else(|| AppError::bad_request("missing module"))?;
    let addresses = state.registry.get(&module);
    if addresses.is_empty() {
        return Err(AppError::bad_request("can not find module"));
    }
    let request = ProfileRequest::from_query(&raw);
    match first_value(&pairs, "format").as_deref() {
        Some("pkg") => package_report(&addresses, &request).await,
        _ => forward_html_report(&addresses[0], &request).await,
    }
}

/// Per-package percentages as a JSON map, with an extra `total` entry.
async fn package_report(
    addresses: &[String],
    request: &ProfileRequest,
) -> Result<Response, AppError> {
    let merged = collect_profiles(
        addresses,
        request.force,
        &request.coverfile,
        &request.skipfile,
    )
    .await
    .map_err(AppError::internal)?;
    let md = covhub_profile::metrics_data(&merged);
    if md.total == 0 {
        return Ok((
            [(CONTENT_TYPE, "application/json")],
            r#"{"total": "0.0%"}"#,
        )
            .into_response());
    }
    let mut data: BTreeMap<String, String> = md
        .pkg_data
        .iter()
        .map(|(pkg, item)| (pkg.clone(), format!("{:.2}%", item.cover_rate)))
        .collect();
    data.insert("total".to_string(), format!("{:.2}%", md.cover_rate));
    Ok(Json(data).into_response())
}

/// The HTML report is rendered by the agent, which owns the source bytes;
/// the hub only relays it.
async fn forward_html_report(
    address: &str,
    request: &ProfileRequest,
) -> Result<Response, AppError> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if request.force {
        query.push(("force", "1".to_string()));
    }
    for pattern in &request.coverfile {
        query.push(("coverfile", pattern.clone()));
    }
    for pattern in &request.skipfile {
        query.push(("skipfile", pattern.clone()));
    }
    let url = format!("{}/v1/cover/report", address.trim_end_matches('/'));
    let resp = reqwest::Client::new()
        .get(url)
        .query(&query)
        .send()
        .await
        .map_err(AppError::expectation_failed)?;
    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = resp.bytes().await.map_err(AppError::expectation_failed)?;
    Ok((status, [(CONTENT_TYPE, "text/html; charset=utf-8")], bytes).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    module: Option<String>,
    beg: Option<String>,
    end: Option<String>,
}

async fn service_metrics(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let module = query
        .module
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::bad_request("missing module"))?;
    let beg = parse_timestamp(query.beg.as_deref(), "beg")?;
    let end = parse_timestamp(query.end.as_deref(), "end")?;
    if beg > end {
        return Err(AppError::bad_request("end > beg"));
    }
    let (beg, end) = if beg == 0 && end == 0 {
        let now = unix_now();
        (now - 15 * 60, now)
    } else {
        (beg, end)
    };
    let data = state.metrics.get(&module, beg, end);
    Ok(Json(serde_json::json!({"data": data})))
}

/// Coverage-over-time chart: stored samples resampled onto minute buckets.
async fn timeline_report(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, AppError> {
    let raw = raw.unwrap_or_default();
    let pairs = query_pairs(&raw);
    let modules: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key == "module")
        .map(|(_, value)| value.clone())
        .collect();
    if modules.is_empty() {
        return Err(AppError::bad_request("missing module"));
    }
    let beg = parse_timestamp(first_value(&pairs, "beg").as_deref(), "beg")?;
    let end = parse_timestamp(first_value(&pairs, "end").as_deref(), "end")?;
    if beg > end {
        return Err(AppError::bad_request("end > beg"));
    }
    let (beg, end) = if beg == 0 && end == 0 {
        let now = unix_now();
        (now - 60 * 60, now)
    } else {
        (beg, end)
    };
    let beg = beg - beg % 60;
    let end = end - end % 60;

    let ts_list: Vec<i64> = (beg..=end).step_by(60).collect();
    let mut data: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for module in modules {
        let samples = state.metrics.get(&module, beg, end + 20);
        let mut coverage = vec![0.0f64; ts_list.len()];
        let mut next = 0;
        for (i, ts) in ts_list.iter().enumerate() {
            if next >= samples.len() || (samples[next].ts - ts).abs() > 30 {
                continue;
            }
            coverage[i] = samples[next].cover_rate;
            next += 1;
        }
        data.insert(module, coverage);
    }

    let ts_json = serde_json::to_string(&ts_list).map_err(AppError::internal)?;
    let data_json = serde_json::to_string(&data).map_err(AppError::internal)?;
    let page = TIMELINE_TEMPLATE
        .replace("__TS_LIST__", &ts_json)
        .replace("__SERIES__", &data_json);
    Ok(Html(page).into_response())
}

fn parse_timestamp(value: Option<&str>, field: &str) -> Result<i64, AppError> {
    match value {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| AppError::bad_request(format!("{field} field must be int"))),
    }
}

fn first_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.clone())
}

fn decode_service(
    raw: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Option<ServiceUnderTest> {
    if is_json(headers) && !body.is_empty() {
        return serde_json::from_slice(body).ok();
    }
    let mut pairs = query_pairs(raw.unwrap_or(""));
    if !body.is_empty() {
        pairs.extend(query_pairs(std::str::from_utf8(body).ok()?));
    }
    let mut name = None;
    let mut address = None;
    for (key, value) in pairs {
        match key.as_str() {
            "name" => name = Some(value),
            "address" => address = Some(value),
            _ => {}
        }
    }
    match (name, address) {
        (Some(name), Some(address)) if !name.is_empty() && !address.is_empty() => {
            Some(ServiceUnderTest { name, address })
        }
        _ => None,
    }
}

fn decode_profile_request(
    raw: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<ProfileRequest, String> {
    if is_json(headers) && !body.is_empty() {
        return serde_json::from_slice(body).map_err(|err| err.to_string());
    }
    let mut combined = raw.unwrap_or("").to_string();
    if !body.is_empty() {
        let form = std::str::from_utf8(body).map_err(|err| err.to_string())?;
        combined.push('&');
        combined.push_str(form);
    }
    Ok(ProfileRequest::from_query(&combined))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

fn split_scheme_host_port(address: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = address.split_once("://")?;
    let (host, port) = rest.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() {
        return None;
    }
    Some((scheme, host, port))
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn expectation_failed(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::EXPECTATION_FAILED,
            message: err.to_string(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
