//! Normalisation of scripted operators. After [`finalize`], every scripted
//! operator is fed directly by another scripted operator, a source, or a
//! fold: a projection below it becomes a script translation of its shape,
//! and an unwind below it becomes a flattening script. Fold heads are given
//! the map-reduce output shape and every fold arm ends in a reducer.

use crate::expr::{DocVar, Expr, Reshape};
use crate::js;
use crate::workflow::{EXPR_NAME, IdHandling, Op, Workflow};

/// Normalise a workflow so that the crusher can lower every scripted
/// operator to a map-reduce job.
pub fn finalize(op: &Workflow) -> Workflow {
	match op.as_op() {
		Op::Map(src, function) => match src.as_op() {
			Op::Project(inner, shape, _) => match shape.to_js(EXPR_NAME) {
				Some(translated) => finalize(
					&inner.clone().map(js::map_map(EXPR_NAME, translated)).map(function.clone()),
				),
				None => Workflow::fix(Op::Map(finalize(src), function.clone())),
			},
			Op::Unwind(inner, field) => match field.path() {
				Some(path) => finalize(
					&inner.clone().flat_map(js::unwind_op(path)).map(function.clone()),
				),
				None => Workflow::fix(Op::Map(finalize(src), function.clone())),
			},
			_ => Workflow::fix(Op::Map(finalize(src), function.clone())),
		},
		Op::FlatMap(src, function) => match src.as_op() {
			Op::Project(inner, shape, _) => match shape.to_js(EXPR_NAME) {
				Some(translated) => finalize(
					&inner
						.clone()
						.map(js::map_map(EXPR_NAME, translated))
						.flat_map(function.clone()),
				),
				None => Workflow::fix(Op::FlatMap(finalize(src), function.clone())),
			},
			Op::Unwind(inner, field) => match field.path() {
				Some(path) => finalize(
					&inner.clone().flat_map(js::unwind_op(path)).flat_map(function.clone()),
				),
				None => Workflow::fix(Op::FlatMap(finalize(src), function.clone())),
			},
			_ => Workflow::fix(Op::FlatMap(finalize(src), function.clone())),
		},
		Op::Reduce(src, function) => match src.as_op() {
			Op::Project(inner, shape, _) => match shape.to_js(EXPR_NAME) {
				Some(translated) => finalize(
					&inner
						.clone()
						.map(js::map_map(EXPR_NAME, translated))
						.reduce(function.clone()),
				),
				None => Workflow::fix(Op::Reduce(finalize(src), function.clone())),
			},
			Op::Unwind(inner, field) => match field.path() {
				Some(path) => finalize(
					&inner.clone().flat_map(js::unwind_op(path)).reduce(function.clone()),
				),
				None => Workflow::fix(Op::Reduce(finalize(src), function.clone())),
			},
			_ => Workflow::fix(Op::Reduce(finalize(src), function.clone())),
		},
		Op::FoldLeft(head, tail) => {
			// The head takes the map-reduce output shape; every arm that is
			// not already a reducer gets the fold reducer appended
			let head = finalize(head)
				.project(Reshape::field(EXPR_NAME, Expr::Var(DocVar::Root)), IdHandling::Include);
			let tail = tail
				.iter()
				.map(|arm| {
					let arm = finalize(arm);
					if matches!(arm.as_op(), Op::Reduce(..)) {
						arm
					} else {
						// The appended reducer may now sit on a reshaping
						// stage, so the arm is normalised once more
						finalize(&arm.reduce(js::fold_left_reduce()))
					}
				})
				.collect();
			Workflow::fix(Op::FoldLeft(head, tail))
		}
		op => Workflow::fix(op.map_children(|child| finalize(child))),
	}
}
