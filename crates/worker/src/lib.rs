//! Task spawning primitives for the chaincode launcher.
//!
//! Every detached task the launcher creates (launch drivers, process monitors, log pumps, stream
//! readers) goes through [`spawn`] or a [`TaskSet`] so it carries a [`TaskClass`] in traces.

#![warn(missing_docs)]

mod class;
mod join_set;
mod spawn;

pub use class::TaskClass;
pub use join_set::TaskSet;
pub use spawn::spawn;

#[cfg(test)]
mod tests;
