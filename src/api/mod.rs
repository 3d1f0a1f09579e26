use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AverageThreshold, BaremeError, Bracket, DEFAULT_NAME, EvaluationMode, ParameterValue,
    Schedule, ScheduleNode, ScheduleTree, combine_all, evaluate, evaluate_par, scale_all,
    weighted_total,
};

#[derive(Parser, Debug)]
#[command(
    name = "bareme",
    about = "Progressive bracket schedules: combine, invert and evaluate tax barèmes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, env = "BAREME_HOST", default_value = "0.0.0.0")]
        host: IpAddr,
        #[arg(long, env = "BAREME_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Evaluate one schedule over a list of bases and print JSON
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(
        long = "bracket",
        value_parser = parse_bracket,
        required = true,
        help = "Bracket as THRESHOLD:RATE, rate as a fraction (repeatable)"
    )]
    brackets: Vec<Bracket>,
    #[arg(
        long = "base",
        required = true,
        allow_negative_numbers = true,
        help = "Tax base to evaluate (repeatable)"
    )]
    bases: Vec<f64>,
    #[arg(long = "weight", help = "Weight per base; enables the weighted total")]
    weights: Vec<f64>,
    #[arg(long, default_value = DEFAULT_NAME)]
    name: String,
    #[arg(long, help = "Interpolate average rates linearly between thresholds")]
    linear_average: bool,
    #[arg(long, help = "Also report the highest bracket reached per base")]
    bracket_index: bool,
}

fn parse_bracket(raw: &str) -> Result<Bracket, String> {
    let (threshold, rate) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected THRESHOLD:RATE, got {raw:?}"))?;
    let threshold = threshold
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid threshold {threshold:?}: {e}"))?;
    let rate = rate
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid rate {rate:?}: {e}"))?;
    Ok(Bracket::new(threshold, rate))
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiMode {
    #[default]
    #[serde(alias = "stepwise")]
    Marginal,
    #[serde(alias = "linearAverage", alias = "linear_average")]
    LinearAverage,
}

impl From<ApiMode> for EvaluationMode {
    fn from(value: ApiMode) -> Self {
        match value {
            ApiMode::Marginal => EvaluationMode::Marginal,
            ApiMode::LinearAverage => EvaluationMode::LinearAverage,
        }
    }
}

impl From<EvaluationMode> for ApiMode {
    fn from(value: EvaluationMode) -> Self {
        match value {
            EvaluationMode::Marginal => ApiMode::Marginal,
            EvaluationMode::LinearAverage => ApiMode::LinearAverage,
        }
    }
}

/// Average-table entry on the wire; a `null` threshold is the infinite sentinel.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
struct AverageEntry {
    threshold: Option<f64>,
    rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mode: Option<ApiMode>,
    brackets: Vec<Bracket>,
    #[serde(default)]
    average_brackets: Option<Vec<AverageEntry>>,
}

// An object with `brackets` is a schedule, any other object a sub-tree.
#[derive(Debug, Deserialize)]
#[serde(try_from = "Value")]
enum NodePayload {
    Schedule(SchedulePayload),
    Parameter(ParameterValue),
    Tree(BTreeMap<String, NodePayload>),
}

impl TryFrom<Value> for NodePayload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) if map.contains_key("brackets") => {
                serde_json::from_value(Value::Object(map))
                    .map(NodePayload::Schedule)
                    .map_err(|e| format!("invalid schedule: {e}"))
            }
            Value::Object(map) => map
                .into_iter()
                .map(|(name, child)| Ok((name, NodePayload::try_from(child)?)))
                .collect::<Result<BTreeMap<_, _>, String>>()
                .map(NodePayload::Tree),
            Value::Number(n) => n
                .as_f64()
                .map(|v| NodePayload::Parameter(ParameterValue::Number(v)))
                .ok_or_else(|| format!("unsupported number {n}")),
            Value::Bool(b) => Ok(NodePayload::Parameter(ParameterValue::Flag(b))),
            Value::String(text) => Ok(NodePayload::Parameter(ParameterValue::Text(text))),
            Value::Null | Value::Array(_) => {
                Err("tree nodes must be schedules, sub-trees or scalar parameters".to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluatePayload {
    schedule: SchedulePayload,
    bases: Vec<f64>,
    #[serde(default)]
    weights: Option<Vec<f64>>,
    #[serde(default)]
    bracket_index: bool,
    #[serde(default)]
    parallel: bool,
}

#[derive(Debug, Deserialize)]
struct SingleSchedulePayload {
    schedule: SchedulePayload,
}

#[derive(Debug, Deserialize)]
struct CombinePayload {
    schedules: Vec<SchedulePayload>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CombineAllPayload {
    tree: BTreeMap<String, NodePayload>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScaleAllPayload {
    tree: BTreeMap<String, NodePayload>,
    factor: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    name: String,
    mode: ApiMode,
    brackets: Vec<Bracket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    average_brackets: Vec<AverageEntry>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum NodeResponse {
    Schedule(ScheduleResponse),
    Parameter(ParameterValue),
    Tree(BTreeMap<String, NodeResponse>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    amounts: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket_index: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weighted_total: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AverageResponse {
    average_brackets: Vec<AverageEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn schedule_from_payload(payload: SchedulePayload) -> Result<Schedule, BaremeError> {
    let name = payload.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
    let mode = payload.mode.unwrap_or_default();
    let mut schedule = Schedule::from_brackets(name, payload.brackets)?.with_mode(mode.into());
    for entry in payload.average_brackets.unwrap_or_default() {
        let threshold = match entry.threshold {
            Some(t) => AverageThreshold::Finite(t),
            None => AverageThreshold::Infinite,
        };
        schedule.add_average_bracket(threshold, entry.rate)?;
    }
    Ok(schedule)
}

fn tree_from_payload(nodes: BTreeMap<String, NodePayload>) -> Result<ScheduleTree, BaremeError> {
    let mut tree = ScheduleTree::new();
    for (name, node) in nodes {
        let node = match node {
            NodePayload::Schedule(payload) => ScheduleNode::Schedule(schedule_from_payload(payload)?),
            NodePayload::Parameter(value) => ScheduleNode::Parameter(value),
            NodePayload::Tree(children) => ScheduleNode::Tree(tree_from_payload(children)?),
        };
        tree.insert(name, node);
    }
    Ok(tree)
}

fn average_entries(schedule: &Schedule) -> Vec<AverageEntry> {
    schedule
        .average_brackets()
        .iter()
        .map(|entry| AverageEntry {
            threshold: entry.threshold.finite(),
            rate: entry.rate,
        })
        .collect()
}

fn schedule_response(schedule: &Schedule) -> ScheduleResponse {
    ScheduleResponse {
        name: schedule.name().to_string(),
        mode: schedule.mode().into(),
        brackets: schedule.brackets().as_slice().to_vec(),
        average_brackets: average_entries(schedule),
    }
}

fn tree_response(tree: &ScheduleTree) -> BTreeMap<String, NodeResponse> {
    tree.iter()
        .map(|(name, node)| {
            let node = match node {
                ScheduleNode::Schedule(schedule) => {
                    NodeResponse::Schedule(schedule_response(schedule))
                }
                ScheduleNode::Parameter(value) => NodeResponse::Parameter(value.clone()),
                ScheduleNode::Tree(subtree) => NodeResponse::Tree(tree_response(subtree)),
            };
            (name.clone(), node)
        })
        .collect()
}

fn evaluate_request(payload: EvaluatePayload) -> Result<EvaluateResponse, BaremeError> {
    let schedule = schedule_from_payload(payload.schedule)?;
    let evaluation = if payload.parallel {
        evaluate_par(&payload.bases, &schedule, payload.bracket_index)?
    } else {
        evaluate(&payload.bases, &schedule, payload.bracket_index)?
    };
    let weighted_total = payload
        .weights
        .map(|weights| weighted_total(&evaluation.amounts, &weights))
        .transpose()?;
    Ok(EvaluateResponse {
        amounts: evaluation.amounts,
        bracket_index: evaluation.bracket_index,
        weighted_total,
    })
}

fn combine_request(payload: CombinePayload) -> Result<ScheduleResponse, BaremeError> {
    let mut schedules = payload
        .schedules
        .into_iter()
        .map(schedule_from_payload)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let mut total = schedules.next().unwrap_or_default();
    for schedule in schedules {
        total.combine(&schedule);
    }
    if let Some(name) = payload.name {
        total.set_name(name);
    }
    Ok(schedule_response(&total))
}

fn combine_all_request(payload: CombineAllPayload) -> Result<ScheduleResponse, BaremeError> {
    let tree = tree_from_payload(payload.tree)?;
    let name = payload.name.as_deref().unwrap_or(DEFAULT_NAME);
    Ok(schedule_response(&combine_all(&tree, name)))
}

fn scale_all_request(
    payload: ScaleAllPayload,
) -> Result<BTreeMap<String, NodeResponse>, BaremeError> {
    let tree = tree_from_payload(payload.tree)?;
    Ok(tree_response(&scale_all(&tree, payload.factor)?))
}

fn invert_request(payload: SingleSchedulePayload) -> Result<ScheduleResponse, BaremeError> {
    let schedule = schedule_from_payload(payload.schedule)?;
    Ok(schedule_response(&schedule.inverted()?))
}

fn average_request(payload: SingleSchedulePayload) -> Result<AverageResponse, BaremeError> {
    let mut schedule = schedule_from_payload(payload.schedule)?;
    schedule.marginal_to_average();
    Ok(AverageResponse {
        average_brackets: average_entries(&schedule),
    })
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/evaluate", post(evaluate_handler))
        .route("/api/combine", post(combine_handler))
        .route("/api/combine-all", post(combine_all_handler))
        .route("/api/scale-all", post(scale_all_handler))
        .route("/api/invert", post(invert_handler))
        .route("/api/average", post(average_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(event = "listening", %addr, "bareme HTTP API listening on http://{addr}");
    axum::serve(listener, router()).await
}

pub fn run_evaluate_command(args: EvaluateArgs) -> Result<String, String> {
    let mode = if args.linear_average {
        EvaluationMode::LinearAverage
    } else {
        EvaluationMode::Marginal
    };
    let payload = EvaluatePayload {
        schedule: SchedulePayload {
            name: Some(args.name),
            mode: Some(mode.into()),
            brackets: args.brackets,
            average_brackets: None,
        },
        bases: args.bases,
        weights: (!args.weights.is_empty()).then_some(args.weights),
        bracket_index: args.bracket_index,
        parallel: false,
    };
    let response = evaluate_request(payload).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| format!("failed to encode result: {e}"))
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn evaluate_handler(Json(payload): Json<EvaluatePayload>) -> Response {
    respond("evaluate", evaluate_request(payload))
}

async fn combine_handler(Json(payload): Json<CombinePayload>) -> Response {
    respond("combine", combine_request(payload))
}

async fn combine_all_handler(Json(payload): Json<CombineAllPayload>) -> Response {
    respond("combine_all", combine_all_request(payload))
}

async fn scale_all_handler(Json(payload): Json<ScaleAllPayload>) -> Response {
    respond("scale_all", scale_all_request(payload))
}

async fn invert_handler(Json(payload): Json<SingleSchedulePayload>) -> Response {
    respond("invert", invert_request(payload))
}

async fn average_handler(Json(payload): Json<SingleSchedulePayload>) -> Response {
    respond("average", average_request(payload))
}

fn respond<T: Serialize>(operation: &str, result: Result<T, BaremeError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            warn!(event = "request_rejected", operation, error = %e);
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
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
