//! HTTP surface of the query gateway
//!
//! | route | purpose |
//! |---|---|
//! | `POST /data/{source}/{table}` | run a query, or defer it with `?async=true` / `Prefer: respond-async` |
//! | `GET /jobs/{job_id}` | job status |
//! | `GET /jobs/hash/{payload_hash}` | jobs created from an identical request |
//! | `GET /health`, `/metrics`, `/datasources`, `/openapi.json` | introspection |

pub mod coordinator;
pub mod extract;
pub mod handlers;
pub mod state;
pub mod types;

pub use coordinator::{ExecutionCoordinator, ExecutionMode, QueryOutcome, QUEUE_PUBLISH_FAILED};
pub use extract::{async_requested, ApiKey, API_KEY_HEADER};
pub use handlers::{apply_middleware, configure_routes, router, ApiDoc};
pub use state::AppState;
pub use types::{AcceptedJob, HealthResponse, MetricsResponse, QueryParams};
