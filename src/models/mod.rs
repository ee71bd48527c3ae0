mod api;

pub use api::{ApiInfo, ClearCacheResponse, EndpointInfo, HealthResponse, StatsResponse};
