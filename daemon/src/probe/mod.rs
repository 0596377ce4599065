//! Probe execution

mod parse;
mod speedtest;

use parse::parse_output;
pub use speedtest::SpeedtestRunner;

use model::{ProbeError, ProbeResult};
use std::future::Future;

/// Something that can produce one measurement.
///
/// The engine only talks to the probe through this seam, so tests can
/// substitute scripted outcomes for the speed test binary.
pub trait ProbeRunner {
    fn execute(&self) -> impl Future<Output = Result<ProbeResult, ProbeError>> + Send;
}
