//! Launch metrics.
//!
//! The launcher reports three series per chaincode:
//!
//! * `chaincode.launch_failures`: startup failures, counted once per failed generation.
//! * `chaincode.launch_timeouts`: startup timeouts.
//! * `chaincode.launch_duration`: seconds from launch start to outcome, labelled by `success`.

use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;

use crate::ChaincodeId;

/// Receiver for launch metrics.
pub trait LaunchMetricsSink: Send + Sync + Debug {
	/// Counts one failed launch of `ccid`.
	fn inc_launch_failures(&self, ccid: &ChaincodeId);
	/// Counts one timed out launch of `ccid`.
	fn inc_launch_timeouts(&self, ccid: &ChaincodeId);
	/// Records how long a launch call took.
	fn observe_launch_duration(&self, ccid: &ChaincodeId, success: bool, secs: f64);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSink;

impl LaunchMetricsSink for NopSink {
	fn inc_launch_failures(&self, _ccid: &ChaincodeId) {}
	fn inc_launch_timeouts(&self, _ccid: &ChaincodeId) {}
	fn observe_launch_duration(&self, _ccid: &ChaincodeId, _success: bool, _secs: f64) {}
}

/// Accumulated metrics for one chaincode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LaunchStats {
	/// Value of `chaincode.launch_failures`.
	pub failures: u64,
	/// Value of `chaincode.launch_timeouts`.
	pub timeouts: u64,
	/// Number of `chaincode.launch_duration` observations.
	pub launches: u64,
	/// Observations with `success = false`.
	pub unsuccessful_launches: u64,
	/// Sum of all observed durations.
	pub total_duration_secs: f64,
}

/// In-memory [`LaunchMetricsSink`].
#[derive(Debug, Default)]
pub struct LaunchMetrics {
	stats: Mutex<HashMap<ChaincodeId, LaunchStats>>,
}

impl LaunchMetrics {
	/// Creates an empty collector.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stats recorded so far for `ccid`; zeroed when nothing was recorded.
	pub fn snapshot(&self, ccid: &ChaincodeId) -> LaunchStats {
		self.stats.lock().get(ccid).copied().unwrap_or_default()
	}

	fn update(&self, ccid: &ChaincodeId, f: impl FnOnce(&mut LaunchStats)) {
		let mut stats = self.stats.lock();
		f(stats.entry(ccid.clone()).or_default());
	}
}

impl LaunchMetricsSink for LaunchMetrics {
	fn inc_launch_failures(&self, ccid: &ChaincodeId) {
		self.update(ccid, |s| s.failures += 1);
	}

	fn inc_launch_timeouts(&self, ccid: &ChaincodeId) {
		self.update(ccid, |s| s.timeouts += 1);
	}

	fn observe_launch_duration(&self, ccid: &ChaincodeId, success: bool, secs: f64) {
		self.update(ccid, |s| {
			s.launches += 1;
			if !success {
				s.unsuccessful_launches += 1;
			}
			s.total_duration_secs += secs;
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stats_are_kept_per_chaincode() {
		let metrics = LaunchMetrics::new();
		let a = ChaincodeId::from("a");
		let b = ChaincodeId::from("b");

		metrics.inc_launch_failures(&a);
		metrics.inc_launch_timeouts(&a);
		metrics.observe_launch_duration(&a, false, 1.5);
		metrics.observe_launch_duration(&a, true, 0.5);
		metrics.observe_launch_duration(&b, true, 2.0);

		assert_eq!(
			metrics.snapshot(&a),
			LaunchStats {
				failures: 1,
				timeouts: 1,
				launches: 2,
				unsuccessful_launches: 1,
				total_duration_secs: 2.0,
			}
		);
		assert_eq!(metrics.snapshot(&b).launches, 1);
		assert_eq!(metrics.snapshot(&"c".into()), LaunchStats::default());
	}
}
