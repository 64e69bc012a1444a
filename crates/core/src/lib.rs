//! # Docflow Core
//!
//! This crate is the internal core library of docflow. It compiles a logical
//! document-database workflow — a tree of filter, reshape, group, unwind,
//! scripted map-reduce, fold and join operators — into an executable task
//! tree of aggregation pipelines and map-reduce jobs.
//!
//! The compiler is purely functional: workflows are immutable value trees,
//! every transformation returns a fresh tree, and the only shared state is
//! reference-counted subtree sharing. Construction goes through smart
//! constructors which fuse compatible adjacent operators on the way in, two
//! independent workflows can be merged into one, and a finished workflow is
//! normalised and crushed down to the task tree a driver would execute.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

mod fmt;

pub mod cnf;
pub mod err;
pub mod expr;
pub mod js;
pub mod task;
pub mod val;
pub mod workflow;
