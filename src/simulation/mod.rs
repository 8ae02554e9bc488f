// Synthetic sensor simulation: generator, thresholds, per-block runner and registry

pub mod generator;
mod registry;
mod runner;
pub mod thresholds;

pub use generator::{FlockProfile, GeneratorState, ReadingGenerator};
pub use registry::{RunnerHandle, SimulationRegistry};
pub use runner::{
    RunnerState, RunnerStats, SimulationOptions, SimulationRunner, TickReport, DEFAULT_INTERVAL,
};
pub use thresholds::{evaluate, ThresholdRule, THRESHOLDS};

#[cfg(test)]
mod tests;
