#![forbid(unsafe_code)]

pub mod boundary;
pub mod config;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use boundary::{
    BoundaryClosed, BoundaryPump, BoundaryTask, ExecutionBoundary, InlineBoundary,
    QueuedBoundary, apply_on_boundary, queued_boundary,
};
pub use config::{ConfigError, ConfigParam, TradeConfig};
pub use service::{ServiceError, TradeService, open_store};
pub use store::{GatewayError, JsonlTradeStore, StoreMetrics, TradeGateway};
pub use sweeper::{CacheSweeper, SweeperStop};
pub use telemetry::init_tracing;
