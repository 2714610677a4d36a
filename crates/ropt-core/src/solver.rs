//! Routing solver client.
//!
//! The solver is an external HTTP service consumed as a black box:
//! `POST {base_url}/solve` with the dense cost matrix, the node-to-index map
//! and a free-form constraints object. It answers with one ordered route per
//! vehicle, as matrix indices or node ids.
//!
//! Every call is bounded by a short deadline. On timeout, transport failure,
//! a non-success status or an unreadable body the caller gets a
//! deterministic degraded [`SolveResult`] (`ok = false`, a reason string and
//! an empty route for the default vehicle) instead of an error, so the
//! consumer loop never stalls on the solver.

use std::collections::BTreeMap;
use std::time::Duration;

use ropt_planning::CostMatrix;
use serde::{Deserialize, Serialize};

use crate::config::{RouteSelection, SolverConfig};

/// Reason reported when the graph has no nodes.
pub const REASON_EMPTY_GRAPH: &str = "empty_graph";

/// Errors from a single solver call.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// No answer within the deadline.
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, reset, ...
    #[error("solver unreachable: {0}")]
    Transport(String),

    /// The solver answered with a non-success status.
    #[error("solver returned HTTP {0}")]
    Status(u16),

    /// The body was not a valid solve response.
    #[error("solver response unreadable: {0}")]
    Decode(String),
}

impl SolverError {
    /// Short machine-readable reason carried in degraded results.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "solver_timeout",
            Self::Transport(_) => "solver_unreachable",
            Self::Status(_) => "solver_http_error",
            Self::Decode(_) => "solver_bad_response",
        }
    }
}

/// Outcome of a solve, with routes translated to node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolveResult {
    /// Whether the routes came from the solver.
    pub ok: bool,
    /// Why the result is degraded, when `ok` is false.
    pub reason: Option<String>,
    /// Vehicle id to ordered node ids.
    pub routes: BTreeMap<String, Vec<String>>,
}

impl SolveResult {
    /// The deterministic fallback: an empty route for `default_vehicle`.
    pub fn degraded(reason: &str, default_vehicle: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_owned()),
            routes: BTreeMap::from([(default_vehicle.to_owned(), Vec::new())]),
        }
    }
}

/// The route chosen for broadcast plus the alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePick {
    /// Vehicle whose route was selected.
    pub vehicle_id: Option<String>,
    /// The selected route.
    pub optimal_path: Vec<String>,
    /// Every other vehicle's route, in vehicle id order.
    pub candidates: Vec<Vec<String>>,
}

/// Pick the broadcast route from `result` according to `selection`.
///
/// [`RouteSelection::Vehicle`] falls back to the first vehicle when the named
/// one has no route.
pub fn select_route(result: &SolveResult, selection: &RouteSelection) -> RoutePick {
    let chosen = match selection {
        RouteSelection::Vehicle(id) if result.routes.contains_key(id) => Some(id.as_str()),
        RouteSelection::First | RouteSelection::Vehicle(_) => {
            result.routes.keys().next().map(String::as_str)
        }
    };

    let Some(vehicle) = chosen else {
        return RoutePick::default();
    };

    RoutePick {
        vehicle_id: Some(vehicle.to_owned()),
        optimal_path: result.routes.get(vehicle).cloned().unwrap_or_default(),
        candidates: result
            .routes
            .iter()
            .filter(|(id, _)| id.as_str() != vehicle)
            .map(|(_, route)| route.clone())
            .collect(),
    }
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    cost_matrix: &'a [Vec<f64>],
    node_map: &'a BTreeMap<String, usize>,
    constraints: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct SolveResponse {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    routes: BTreeMap<String, Vec<RouteStop>>,
}

const fn default_ok() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RouteStop {
    Index(usize),
    Node(String),
}

/// HTTP client for the routing solver.
pub struct Solver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    default_vehicle: String,
    selection: RouteSelection,
}

impl Solver {
    /// Build a client from configuration.
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            timeout: config.timeout(),
            default_vehicle: config.default_vehicle.clone(),
            selection: config.route_selection.clone(),
        }
    }

    /// The configured route selection policy.
    pub const fn selection(&self) -> &RouteSelection {
        &self.selection
    }

    /// Solve, substituting the degraded fallback on any failure.
    ///
    /// An empty matrix skips the call and reports [`REASON_EMPTY_GRAPH`].
    pub async fn solve(&self, matrix: &CostMatrix, constraints: &serde_json::Value) -> SolveResult {
        if matrix.is_empty() {
            return SolveResult::degraded(REASON_EMPTY_GRAPH, &self.default_vehicle);
        }
        match self.try_solve(matrix, constraints).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, reason = e.reason(), "Solver call failed, using fallback route");
                SolveResult::degraded(e.reason(), &self.default_vehicle)
            }
        }
    }

    /// One bounded solver call.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] describing why no usable answer arrived.
    pub async fn try_solve(
        &self,
        matrix: &CostMatrix,
        constraints: &serde_json::Value,
    ) -> Result<SolveResult, SolverError> {
        let url = format!("{}/solve", self.base_url);
        let body = SolveRequest {
            cost_matrix: &matrix.matrix,
            node_map: &matrix.node_map,
            constraints,
        };

        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| SolverError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SolverError::Status(status.as_u16()));
            }

            response
                .json::<SolveResponse>()
                .await
                .map_err(|e| SolverError::Decode(e.to_string()))
        };

        let parsed = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_elapsed| SolverError::Timeout(self.timeout))??;

        let routes = parsed
            .routes
            .into_iter()
            .map(|(vehicle, stops)| {
                let nodes = stops
                    .into_iter()
                    .map(|stop| match stop {
                        RouteStop::Index(i) => matrix
                            .node_at(i)
                            .map(str::to_owned)
                            .ok_or_else(|| SolverError::Decode(format!("route index {i} out of range"))),
                        RouteStop::Node(id) => Ok(id),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((vehicle, nodes))
            })
            .collect::<Result<BTreeMap<_, _>, SolverError>>()?;

        let reason = if parsed.ok {
            parsed.reason
        } else {
            parsed.reason.or_else(|| Some("solver_rejected".to_owned()))
        };

        Ok(SolveResult {
            ok: parsed.ok,
            reason,
            routes,
        })
    }

    /// Probe `GET {base_url}/health` within the solve deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the solver does not answer successfully.
    pub async fn health(&self) -> Result<(), SolverError> {
        let url = format!("{}/health", self.base_url);
        let call = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SolverError::Transport(e.to_string()))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(SolverError::Status(response.status().as_u16()))
            }
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_elapsed| SolverError::Timeout(self.timeout))?
    }
}
