use std::panic::Location;

use thiserror::Error;

/// An error raised by the workflow compiler.
///
/// The compiler is total on well-typed inputs, so every variant here marks a
/// structural impossibility: a state that a correctly constructed workflow
/// cannot reach. These errors abort the compile and must not be retried.
/// Expected optional failures (an inline that does not apply, a shape with
/// no script translation) are `Option` returns, never errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The compiler reached a state that should be unreachable
	#[error("{0}")]
	Unreachable(String),

	/// A reference rewrite tried to relocate a positional reference onto the document root
	#[error("A rewrite would relocate {0} onto the document root")]
	InvalidRewrite(String),

	/// A fold arm compiled to a task that is not a map-reduce
	#[error("A fold arm compiled to a task that is not a map-reduce: {0}")]
	InvalidFoldArm(String),

	/// The workflow tree is deeper than the configured limit
	#[error("The workflow tree exceeds the maximum plan depth of {0}")]
	PlanDepth(usize),
}

impl Error {
	/// Construct an unreachable-state error annotated with the caller location
	#[track_caller]
	pub(crate) fn unreachable<T: std::fmt::Display>(message: T) -> Error {
		let location = Location::caller();
		Error::Unreachable(format!("{}:{}: {}", location.file(), location.line(), message))
	}
}
