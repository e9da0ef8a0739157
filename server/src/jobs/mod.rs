//! Job processing: the serial worker and the health monitor

pub mod monitor;
pub mod processor;

pub use monitor::HealthMonitor;
pub use processor::Processor;
