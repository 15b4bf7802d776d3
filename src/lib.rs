//! Polls a vendor role-onboarding workflow once, classifies the returned
//! task result and turns it into a completed marker or exactly one
//! [`InvocationError`](error::InvocationError).

pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod response;
pub mod retry;
pub mod state_machine;
pub mod ui;
pub mod vendor;
