pub mod generator;

pub use generator::{base_confidence, regime_factor, SignalGenerator};
