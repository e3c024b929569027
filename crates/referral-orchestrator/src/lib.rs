//! Referral lifecycle orchestration for food-benefit programs.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
