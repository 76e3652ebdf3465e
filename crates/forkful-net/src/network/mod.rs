//! Connectivity detection.
//!
//! This module provides:
//! - Platform link adapters (pushed OS events, or interface polling)
//! - HTTP reachability and latency probes
//! - The connectivity probe that reconciles link state with reachability
//! - The network quality classifier

mod client;
mod link;
mod probe;
mod quality;

pub use client::{
    DynLatencyProbe, DynReachabilityCheck, FixedLatency, HttpProbeClient, LatencyProbe,
    ReachabilityCheck, StaticReachability,
};
pub use link::{ConnectionType, DynLinkMonitor, LinkInfo, LinkMonitor, PushLinkMonitor, SystemLinkMonitor};
pub use probe::{ConnectionState, ConnectivityProbe};
pub use quality::{NetworkQuality, QualityClassifier};
