//! Core domain types and traits for the buildfarm coordinator.
//!
//! This crate contains:
//! - Worker and job identifiers
//! - Worker and job domain types
//! - The worker driver trait (RPC and dispatch capability)
//! - Error taxonomy shared by the scan machinery

pub mod driver;
pub mod error;
pub mod id;
pub mod job;
pub mod worker;

pub use driver::{WorkerDriver, WorkerDriverFactory};
pub use error::{Error, Result};
pub use id::{JobId, WorkerId};
pub use job::{JobInfo, JobStatus};
pub use worker::WorkerInfo;
