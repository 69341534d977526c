// Domain layer - Timeline, buffer and node models
pub mod node;
pub mod selector;
pub mod stream;
