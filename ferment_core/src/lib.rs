#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names,
    clippy::similar_names
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Fermentation state estimation and temperature control (hardware-agnostic).
//!
//! All hardware interaction goes through `ferment_traits::Actuator`; time
//! goes through `ferment_traits::Clock`. Timestamps are Unix milliseconds,
//! rates are per hour.
//!
//! ## Architecture
//!
//! Ingestion path, per device:
//!
//! - **Estimation**: two-state Kalman-style filter per signal (`estimator`)
//! - **Anomalies**: stuck / rapid change / sensor fault rules (`anomaly`)
//! - **Prediction**: exponential-decay curve fit for FG and completion (`predictor`)
//! - **Orchestration**: device registry, hydration and reset (`pipeline`)
//!
//! Control path, per batch:
//!
//! - **Model learning**: heating, cooling and ambient coupling (`thermal`)
//! - **Control**: hysteresis or model-predictive decisions (`controller`)
//! - **Safety**: overrides, mutual exclusion, minimum cycle time (`safety`)
//! - **Scheduling**: batch registry and background ticking (`scheduler`)
//!
//! Persistence is a seam (`store`); nothing on the hot path blocks on it.

pub mod anomaly;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod estimator;
pub mod history;
pub mod hw_error;
pub mod mocks;
pub mod pipeline;
pub mod predictor;
pub mod safety;
pub mod scheduler;
pub mod store;
pub mod thermal;
pub mod util;

pub use anomaly::{AnomalyReason, AnomalyReport};
pub use config::CoreConfig;
pub use controller::{Controller, ControllerState, Decision, DecisionReason};
pub use error::{BuildError, FermentError, HydrationFailure, InvalidSample, Result};
pub use estimator::{FilteredSample, StateEstimator};
pub use history::{HistoryRecord, HistorySample};
pub use pipeline::{DeviceSnapshot, HydrationReport, Pipeline, ProcessedOutputs, SignalEstimate};
pub use predictor::{Availability, CurveFit, PredictionResult, Unavailable};
pub use safety::{ActuatorKind, ControlAction, ControlEvent, SafetyLayer, SafetyOutcome};
pub use scheduler::{BatchSpec, ControlLoop, ControlScheduler, TickReport};
pub use store::{HistoryStore, MemoryStore, StoreWriter};
pub use thermal::{ModelRejection, TemperaturePoint, ThermalModel, ThermalObservation};
