// Application state for HTTP handlers
use crate::application::render_surface::HorizonFrame;
use crate::application::stats_engine::StatsEngine;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<StatsEngine>>,
    pub frames: watch::Receiver<Arc<HorizonFrame>>,
}

impl AppState {
    pub fn new(engine: StatsEngine) -> Self {
        let frames = engine.frames();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            frames,
        }
    }

    pub fn latest_frame(&self) -> Arc<HorizonFrame> {
        self.frames.borrow().clone()
    }
}
