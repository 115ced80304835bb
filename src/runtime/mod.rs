// src/runtime/mod.rs

//! The scheduler seam and the schedulers shipped with the crate.

pub mod master;
pub mod scheduler;
pub mod tokio_local;

pub use master::Master;
pub use scheduler::{Scheduler, Task, TaskId};
pub use tokio_local::TokioScheduler;
