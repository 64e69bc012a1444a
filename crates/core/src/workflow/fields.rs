//! Dropping fields no downstream operator demands. The pass is top-down: a
//! demand set flows from consumers to producers, and field-defining
//! operators shed the entries nothing asks for. An empty demand set means
//! the consumer is unknown, so nothing at that level may be dropped.

use std::collections::{BTreeMap, BTreeSet};

use crate::expr::{FieldPath, Grouped, Reshape};
use crate::workflow::rewrite::each_ref;
use crate::workflow::{Op, Workflow};

/// Drop every field the workflow computes but never uses. The entry point
/// of the top-level compile: the outermost consumer is unknown, so the
/// initial demand set is empty.
pub fn finish(op: &Workflow) -> Workflow {
	delete_unused_fields(op, &BTreeSet::new())
}

/// Drop unused fields given the set of field paths demanded downstream.
pub fn delete_unused_fields(op: &Workflow, used: &BTreeSet<FieldPath>) -> Workflow {
	let pruned = prune(op.as_op(), used);
	let demand = child_demand(&pruned, used);
	Workflow::fix(pruned.map_children(|child| delete_unused_fields(child, &demand)))
}

/// Shed undemanded entries from a field-defining operator. A pruning that
/// would empty a projection is skipped: the shape must keep producing
/// something.
fn prune(op: &Op, used: &BTreeSet<FieldPath>) -> Op {
	if used.is_empty() {
		return op.clone();
	}
	let wanted: BTreeSet<&str> = used.iter().map(|path| path.head()).collect();
	match op {
		Op::Project(src, shape, id) => {
			let fields: BTreeMap<_, _> = shape
				.0
				.iter()
				.filter(|(name, _)| wanted.contains(name.as_str()))
				.map(|(name, field)| (name.clone(), field.clone()))
				.collect();
			if fields.is_empty() {
				op.clone()
			} else {
				Op::Project(src.clone(), Reshape(fields), *id)
			}
		}
		Op::Group(src, grouped, by) => {
			let fields: BTreeMap<_, _> = grouped
				.0
				.iter()
				.filter(|(name, _)| wanted.contains(name.as_str()))
				.map(|(name, accumulator)| (name.clone(), accumulator.clone()))
				.collect();
			Op::Group(src.clone(), Grouped(fields), by.clone())
		}
		op => op.clone(),
	}
}

/// The demand set seen by the children of an operator.
fn child_demand(op: &Op, used: &BTreeSet<FieldPath>) -> BTreeSet<FieldPath> {
	match op {
		// A reshaping operator consumes exactly what its expressions reference
		Op::Project(..) | Op::Group(..) => own_refs(op).unwrap_or_default(),
		// Scripted operators and whole-document stages may read anything
		Op::Map(..)
		| Op::FlatMap(..)
		| Op::Reduce(..)
		| Op::Redact(..)
		| Op::GeoNear(..)
		| Op::FoldLeft(..)
		| Op::Join(_) => BTreeSet::new(),
		// Shape-preserving stages pass the demand through, adding their own
		op => {
			if used.is_empty() {
				return BTreeSet::new();
			}
			match own_refs(op) {
				Some(mut refs) => {
					refs.extend(used.iter().cloned());
					refs
				}
				None => BTreeSet::new(),
			}
		}
	}
}

/// The field paths an operator references, or `None` if it references the
/// whole document.
fn own_refs(op: &Op) -> Option<BTreeSet<FieldPath>> {
	let mut paths = BTreeSet::new();
	let mut whole_document = false;
	each_ref(op, &mut |var| match var.path() {
		Some(path) => {
			paths.insert(path.clone());
		}
		None => whole_document = true,
	});
	if whole_document {
		None
	} else {
		Some(paths)
	}
}
