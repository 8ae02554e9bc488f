// Flock blocks and validation
pub mod flock;

// Sensor readings, metrics and alert events
pub mod sensor;

// Reading generator, thresholds, runners and the registry
pub mod simulation;

// SQLite persistence
pub mod storage;

// History ranges and averages
pub mod history;

// TOML configuration
pub mod config;

// HTTP API
pub mod api;
