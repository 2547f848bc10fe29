pub mod emotion;
pub mod engine;
pub mod face;
pub mod pipeline;
