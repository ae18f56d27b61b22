pub mod accumulator;
pub mod cleanup;
pub mod dedup;
pub mod detector;
pub mod engine;
pub mod executor;
pub mod progress;
pub mod projection;
pub mod queue;
