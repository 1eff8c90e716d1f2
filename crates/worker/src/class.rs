/// Execution classes used to tag spawned work in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Drives one chaincode launch from build to termination.
	Launch,
	/// Owns a chaincode process and reports its exit.
	Monitor,
	/// Pumps bytes between a chaincode and the peer (stderr forwarding, stream readers).
	Io,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Launch => "launch",
			Self::Monitor => "monitor",
			Self::Io => "io",
		}
	}
}
