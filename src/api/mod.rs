use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    BatchStop, Bucket, CorrelationMatrix, EngineError, EngineSnapshot, SimulationConfig,
    Simulator, TransferOutcome, WithdrawalMode, YearOutcome,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMode {
    Auto,
    Manual,
}

impl From<CliMode> for WithdrawalMode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Auto => WithdrawalMode::Auto,
            CliMode::Manual => WithdrawalMode::Manual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ApiMode {
    #[serde(alias = "automatic")]
    Auto,
    #[serde(alias = "manualTransfer", alias = "manual_transfer")]
    Manual,
}

impl From<ApiMode> for CliMode {
    fn from(value: ApiMode) -> Self {
        match value {
            ApiMode::Auto => CliMode::Auto,
            ApiMode::Manual => CliMode::Manual,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Year-by-year retirement drawdown across correlated investment buckets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON session API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Advance a run for a number of years and print it as JSON
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 10_000_000.0, help = "Corpus at the start of drawdown")]
    starting_corpus: f64,
    #[arg(
        long,
        default_value_t = 600_000.0,
        help = "Expense for the first year, grown by inflation afterwards"
    )]
    first_year_expense: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Annual expense inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        value_enum,
        default_value_t = CliMode::Auto,
        help = "auto draws from buckets in order; manual stops at the first shortfall"
    )]
    mode: CliMode,
    #[arg(long, default_value_t = 30, help = "Maximum number of years to advance")]
    years: u32,
    #[arg(long, help = "Seed for a reproducible run; omitted means OS entropy")]
    seed: Option<u64>,
    #[arg(skip)]
    buckets: Option<Vec<Bucket>>,
    #[arg(skip)]
    correlation: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StartPayload {
    starting_corpus: Option<f64>,
    first_year_expense: Option<f64>,
    inflation_rate: Option<f64>,
    mode: Option<ApiMode>,
    buckets: Option<Vec<Bucket>>,
    correlation: Option<Vec<Vec<f64>>>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferPayload {
    from: usize,
    to: usize,
    amount: f64,
}

#[derive(Debug)]
struct ApiStartRequest {
    config: SimulationConfig,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdvanceResponse {
    #[serde(flatten)]
    outcome: YearOutcome,
    snapshot: EngineSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    #[serde(flatten)]
    outcome: TransferOutcome,
    snapshot: EngineSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub stop: BatchStop,
    pub snapshot: EngineSnapshot,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("session lock poisoned")]
    LockPoisoned,
}

impl<T> From<PoisonError<T>> for ApiError {
    fn from(_: PoisonError<T>) -> Self {
        ApiError::LockPoisoned
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::NotStarted | EngineError::StateConflict { .. }) => {
                StatusCode::CONFLICT
            }
            ApiError::Engine(_) => StatusCode::BAD_REQUEST,
            ApiError::LockPoisoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
            return error_response(status, "Internal server error");
        }
        error_response(status, &self.to_string())
    }
}

#[derive(Default)]
struct Session {
    simulator: Option<Simulator>,
}

impl Session {
    fn snapshot(&self) -> EngineSnapshot {
        self.simulator
            .as_ref()
            .map_or_else(EngineSnapshot::not_started, Simulator::snapshot)
    }

    fn simulator_mut(&mut self) -> Result<&mut Simulator, ApiError> {
        self.simulator
            .as_mut()
            .ok_or(ApiError::Engine(EngineError::NotStarted))
    }
}

type SharedSession = Arc<Mutex<Session>>;

pub fn reference_buckets() -> Vec<Bucket> {
    [
        ("Liquid Fund", 10.0, 6.5, 1.0),
        ("Short-Term Debt", 20.0, 7.5, 3.0),
        ("Large Cap Equity", 35.0, 12.0, 16.0),
        ("Mid & Small Cap Equity", 25.0, 14.0, 24.0),
        ("Gold", 10.0, 9.0, 15.0),
    ]
    .into_iter()
    .map(|(name, allocation, avg, vol)| Bucket {
        name: name.to_string(),
        allocation_percent: allocation,
        avg_return_percent: avg,
        volatility_percent: vol,
    })
    .collect()
}

/// Index-aligned with [`reference_buckets`].
pub fn reference_correlation() -> Vec<Vec<f64>> {
    vec![
        vec![1.0, 0.30, 0.00, 0.00, 0.10],
        vec![0.30, 1.0, 0.10, 0.05, 0.20],
        vec![0.00, 0.10, 1.0, 0.75, -0.10],
        vec![0.00, 0.05, 0.75, 1.0, -0.05],
        vec![0.10, 0.20, -0.10, -0.05, 1.0],
    ]
}

fn build_config(args: SimulateArgs) -> Result<SimulationConfig, String> {
    if !args.starting_corpus.is_finite() || args.starting_corpus < 0.0 {
        return Err("--starting-corpus must be >= 0".to_string());
    }

    if !args.first_year_expense.is_finite() || args.first_year_expense < 0.0 {
        return Err("--first-year-expense must be >= 0".to_string());
    }

    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    let custom_buckets = args.buckets.is_some();
    let buckets = args.buckets.unwrap_or_else(reference_buckets);
    if buckets.is_empty() {
        return Err("buckets must not be empty".to_string());
    }
    if buckets.iter().any(|b| b.name.trim().is_empty()) {
        return Err("every bucket needs a name".to_string());
    }

    let correlation = match args.correlation {
        Some(rows) => rows,
        None if custom_buckets => CorrelationMatrix::identity(buckets.len()).rows().to_vec(),
        None => reference_correlation(),
    };
    if correlation.len() != buckets.len() || correlation.iter().any(|r| r.len() != buckets.len())
    {
        return Err(format!(
            "correlation must be a {n}x{n} matrix for {n} buckets",
            n = buckets.len()
        ));
    }

    Ok(SimulationConfig {
        buckets,
        starting_corpus: args.starting_corpus,
        first_year_expense: args.first_year_expense,
        inflation_rate: args.inflation_rate / 100.0,
        mode: args.mode.into(),
        correlation: CorrelationMatrix::new(correlation),
    })
}

fn default_args_for_api() -> SimulateArgs {
    SimulateArgs {
        starting_corpus: 10_000_000.0,
        first_year_expense: 600_000.0,
        inflation_rate: 6.0,
        mode: CliMode::Manual,
        years: 1,
        seed: None,
        buckets: None,
        correlation: None,
    }
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiStartRequest, String> {
    let payload = serde_json::from_str::<StartPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: StartPayload) -> Result<ApiStartRequest, String> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.starting_corpus {
        args.starting_corpus = v;
    }
    if let Some(v) = payload.first_year_expense {
        args.first_year_expense = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.mode {
        args.mode = v.into();
    }
    if payload.buckets.is_some() {
        args.buckets = payload.buckets;
    }
    if payload.correlation.is_some() {
        args.correlation = payload.correlation;
    }

    Ok(ApiStartRequest {
        config: build_config(args)?,
        seed: payload.seed,
    })
}

fn simulator_for(seed: Option<u64>) -> Simulator {
    match seed {
        Some(seed) => Simulator::seeded(seed),
        None => Simulator::from_entropy(),
    }
}

pub fn run_batch(args: SimulateArgs) -> Result<BatchReport, String> {
    if args.years == 0 {
        return Err("--years must be > 0".to_string());
    }
    let years = args.years;
    let mut simulator = simulator_for(args.seed);
    let config = build_config(args)?;

    simulator.start(config).map_err(|e| e.to_string())?;
    let stop = simulator.run_years(years).map_err(|e| e.to_string())?;
    Ok(BatchReport {
        stop,
        snapshot: simulator.snapshot(),
    })
}

fn apply_start(session: &Mutex<Session>, payload: StartPayload) -> Result<EngineSnapshot, ApiError> {
    let request = api_request_from_payload(payload).map_err(ApiError::InvalidRequest)?;
    let mut simulator = simulator_for(request.seed);
    simulator.start(request.config)?;

    let snapshot = simulator.snapshot();
    session.lock()?.simulator = Some(simulator);
    Ok(snapshot)
}

fn apply_advance(session: &Mutex<Session>) -> Result<AdvanceResponse, ApiError> {
    let mut guard = session.lock()?;
    let simulator = guard.simulator_mut()?;
    let outcome = simulator.advance_year()?;
    Ok(AdvanceResponse {
        outcome,
        snapshot: simulator.snapshot(),
    })
}

fn apply_transfer(
    session: &Mutex<Session>,
    payload: TransferPayload,
) -> Result<TransferResponse, ApiError> {
    let mut guard = session.lock()?;
    let simulator = guard.simulator_mut()?;
    let outcome = simulator.transfer(payload.from, payload.to, payload.amount)?;
    Ok(TransferResponse {
        outcome,
        snapshot: simulator.snapshot(),
    })
}

fn apply_reset(session: &Mutex<Session>) -> Result<EngineSnapshot, ApiError> {
    let mut guard = session.lock()?;
    if let Some(simulator) = guard.simulator.as_mut() {
        simulator.reset();
    }
    Ok(guard.snapshot())
}

fn current_snapshot(session: &Mutex<Session>) -> Result<EngineSnapshot, ApiError> {
    Ok(session.lock()?.snapshot())
}

pub fn router() -> Router {
    let session: SharedSession = Arc::new(Mutex::new(Session::default()));
    Router::new()
        .route("/api/config/default", get(default_config_handler))
        .route("/api/state", get(state_handler))
        .route("/api/start", post(start_handler))
        .route("/api/advance", post(advance_handler))
        .route("/api/transfer", post(transfer_handler))
        .route("/api/reset", post(reset_handler))
        .fallback(not_found_handler)
        .with_state(session)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("drawdown HTTP API listening on http://{addr}");
    info!("Local access: http://127.0.0.1:{port}/api/state");

    axum::serve(listener, router()).await
}

async fn default_config_handler() -> Response {
    respond(build_config(default_args_for_api()).map_err(ApiError::InvalidRequest))
}

async fn state_handler(State(session): State<SharedSession>) -> Response {
    respond(current_snapshot(&session))
}

async fn start_handler(
    State(session): State<SharedSession>,
    Json(payload): Json<StartPayload>,
) -> Response {
    respond(apply_start(&session, payload))
}

async fn advance_handler(State(session): State<SharedSession>) -> Response {
    respond(apply_advance(&session))
}

async fn transfer_handler(
    State(session): State<SharedSession>,
    Json(payload): Json<TransferPayload>,
) -> Response {
    respond(apply_transfer(&session, payload))
}

async fn reset_handler(State(session): State<SharedSession>) -> Response {
    respond(apply_reset(&session))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => err.into_response(),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
