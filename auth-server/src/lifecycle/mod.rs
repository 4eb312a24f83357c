//! Service lifecycle: startup validation, the environment policy, and the
//! live readiness/liveness view served by the health endpoints.

mod controller;
pub mod policy;

pub use controller::{
    LifecycleError, LifecycleState, LifecycleView, LivenessReport, LivenessStatus,
    ReadinessReport, ServiceLifecycleController,
};
