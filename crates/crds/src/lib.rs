//! Host IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Host IPAM controller.

pub mod host_ipam;

pub use host_ipam::*;
