//! Arbitrage-window detection pipeline.
//!
//! The pipeline observes paired prediction-market contracts on Kalshi and
//! Polymarket and records net-positive arbitrage windows. It never trades.
//!
//! Data flow per tick:
//!
//! ```text
//! Scheduler -> MarketFetcher x2 (concurrent)
//!           -> Validator -> CostModel -> SpreadEngine
//!           -> WindowTracker -> Recorder (snapshot + window logs)
//! ```
//!
//! The Checkpointer persists open windows on an independent period so a
//! restart within the grace window resumes them seamlessly.

pub mod alert;
pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod recorder;
pub mod scheduler;
pub mod spread;
pub mod supervisor;
pub mod validator;
pub mod window;

pub use config::{AppConfig, ConfigError};
pub use cost::CostModel;
pub use recorder::{Recorder, RecorderError};
pub use scheduler::{RateLimitState, Scheduler};
pub use spread::{NetSpread, SpreadEngine};
pub use supervisor::{ShutdownReason, Supervisor};
pub use validator::{validate, ValidationError};
pub use window::WindowTracker;
