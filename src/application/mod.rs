// Application layer - Acquisition engine, rendering and orchestration
pub mod clock;
pub mod metric_fetcher;
pub mod render_surface;
pub mod series_context;
pub mod stats_api;
pub mod stats_engine;
pub mod visibility_gate;

#[cfg(test)]
pub mod test_support;
