//! Operational surface: registry inspection, the startup probe and the
//! HTTP endpoint.

pub mod http;
pub mod inspect;
pub mod probe;

pub use http::{ManagementServer, router, status_for};
pub use inspect::{HealthReport, HealthStatus, InspectionSnapshot, Inspector, TargetInspection};
pub use probe::{ProbeReport, TargetProbe, probe_targets};
