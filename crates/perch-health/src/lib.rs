//! Perch health evaluation.
//!
//! Two pieces: an HTTP client for a pull-only alarm endpoint
//! ([`HttpAlarmGateway`]), and the [`HealthEvaluator`] that polls a set of
//! alarms through any [`perch_core::traits::AlarmGateway`] and aggregates
//! the answers into a single verdict per sample.

pub mod evaluator;
pub mod gateway;

pub use evaluator::HealthEvaluator;
pub use gateway::HttpAlarmGateway;
