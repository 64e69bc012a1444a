//! Merging two independent workflow trees into one.
//!
//! [`merge`] returns the combined tree together with a pair of rebase paths:
//! inside the merged tree, the values that were the root of the left
//! operand's output are reachable via the first path, and symmetrically for
//! the right. Whenever the two outputs must be kept side by side they are
//! stored under the reserved names [`LEFT_NAME`] and [`RIGHT_NAME`].
//!
//! Rules are matched on the ordered pair of operators. When a rule is
//! defined only one way around, the merger delegates to the reversed call
//! and swaps the returned base pair, so no rule is ever duplicated. Rules
//! that fire on two operators of the same variant keep a stable left-before-
//! right ordering instead.

use std::collections::{BTreeMap, BTreeSet};

use crate::expr::{Accumulator, DocVar, Expr, FieldPath, GroupBy, Grouped, Reshape, ShapeField};
use crate::val::{Bson, Document};
use crate::workflow::rewrite::rebase;
use crate::workflow::{EXPR_NAME, IdHandling, Op, Workflow, coalesce::coalesce};

/// The reserved field holding the left operand's output after a merge.
pub const LEFT_NAME: &str = "lEft";

/// The reserved field holding the right operand's output after a merge.
pub const RIGHT_NAME: &str = "rIght";

fn left_var() -> DocVar {
	DocVar::field(LEFT_NAME)
}

fn right_var() -> DocVar {
	DocVar::field(RIGHT_NAME)
}

/// Merge two workflows into one.
///
/// The returned pair `(left_base, right_base)` tells a consumer where the
/// logical root of each operand's output now lives in the merged tree.
pub fn merge(left: &Workflow, right: &Workflow) -> ((DocVar, DocVar), Workflow) {
	if left == right {
		return ((DocVar::Root, DocVar::Root), left.clone());
	}
	match (left.as_op(), right.as_op()) {
		(Op::Pure(l), Op::Pure(r)) => {
			let doc = Bson::Doc(Document::from(map! {
				LEFT_NAME => l.clone(),
				RIGHT_NAME => r.clone(),
			}));
			((left_var(), right_var()), Workflow::pure(doc))
		}
		(Op::Pure(value), _) => {
			let shape = Reshape::from(map! {
				LEFT_NAME => ShapeField::Expr(Expr::Literal(value.clone())),
				RIGHT_NAME => ShapeField::Expr(Expr::Var(DocVar::Root)),
			});
			(
				(left_var(), right_var()),
				right.clone().project(shape, IdHandling::Include),
			)
		}
		(_, Op::Pure(_)) => delegate(left, right),
		// A geo-near stage must stay at the head of its pipeline, so the
		// other side is the one broken apart
		(Op::GeoNear(..), r) if r.is_pipelineable() && r.is_single_source() => {
			descend_right(left, right)
		}
		(l, Op::GeoNear(..)) if l.is_pipelineable() && l.is_single_source() => {
			delegate(left, right)
		}
		(Op::Project(lsrc, shape, id), _) if lsrc == right => {
			let shape = Reshape::from(map! {
				LEFT_NAME => ShapeField::Shape(shape.clone()),
				RIGHT_NAME => ShapeField::Expr(Expr::Var(DocVar::Root)),
			});
			(
				(left_var(), right_var()),
				lsrc.clone().project(shape, id.combine(IdHandling::Include)),
			)
		}
		(_, Op::Project(rsrc, ..)) if rsrc == left => delegate(left, right),
		(l, r) if l.is_shape_preserving() && r.is_pipelineable() && r.is_single_source() => {
			descend_right(left, right)
		}
		(l, r) if l.is_pipelineable() && l.is_single_source() && r.is_shape_preserving() => {
			delegate(left, right)
		}
		(Op::Unwind(lsrc, field), Op::Group(..)) => {
			let ((lb, rb), src) = merge(lsrc, right);
			let unwound = lb.concat(field);
			((lb, rb), src.unwind(unwound))
		}
		(Op::Group(..), Op::Unwind(..)) => delegate(left, right),
		(Op::Group(lsrc, lg, lby), Op::Group(rsrc, rg, rby)) => {
			merge_groups(lsrc, lg, lby, rsrc, rg, rby, right)
		}
		(Op::Group(lsrc, lg, lby), r) if r.is_pipelineable() && r.is_single_source() => {
			merge_group_any(lsrc, lg, lby, right)
		}
		(l, Op::Group(..)) if l.is_pipelineable() && l.is_single_source() => {
			delegate(left, right)
		}
		(Op::Project(lsrc, ls, lid), Op::Project(rsrc, rs, rid)) => {
			let ((lb, rb), src) = merge(lsrc, rsrc);
			let ls = ls.map_up(&|v| lb.concat(v));
			let rs = rs.map_up(&|v| rb.concat(v));
			match ls.merge(&rs) {
				Some(shape) => (
					(DocVar::Root, DocVar::Root),
					src.project(shape, lid.combine(*rid)),
				),
				None => {
					let shape = Reshape::from(map! {
						LEFT_NAME => ShapeField::Shape(ls),
						RIGHT_NAME => ShapeField::Shape(rs),
					});
					((left_var(), right_var()), src.project(shape, lid.combine(*rid)))
				}
			}
		}
		(Op::Project(lsrc, shape, id), r)
			if r.is_source() || (r.is_pipelineable() && r.is_single_source()) =>
		{
			let ((lb, rb), src) = merge(lsrc, right);
			let shape = Reshape::from(map! {
				LEFT_NAME => ShapeField::Shape(shape.map_up(&|v| lb.concat(v))),
				RIGHT_NAME => ShapeField::Expr(Expr::Var(rb)),
			});
			(
				(left_var(), right_var()),
				src.project(shape, id.combine(IdHandling::Include)),
			)
		}
		(l, Op::Project(..))
			if l.is_source() || (l.is_pipelineable() && l.is_single_source()) =>
		{
			delegate(left, right)
		}
		(Op::Redact(lsrc, le), Op::Redact(rsrc, re)) => {
			let ((lb, rb), src) = merge(lsrc, rsrc);
			let le = le.map_up(&|v| lb.concat(v));
			let re = re.map_up(&|v| rb.concat(v));
			((lb, rb), src.redact(le).redact(re))
		}
		(Op::Unwind(lsrc, lf), Op::Unwind(rsrc, rf)) => {
			let ((lb, rb), src) = merge(lsrc, rsrc);
			let lf = lb.concat(lf);
			let rf = rb.concat(rf);
			if lf == rf {
				((lb, rb), src.unwind(lf))
			} else {
				((lb, rb), src.unwind(lf).unwind(rf))
			}
		}
		(Op::Unwind(lsrc, field), Op::Redact(..)) => {
			let ((lb, rb), src) = merge(lsrc, right);
			let unwound = lb.concat(field);
			((lb, rb), src.unwind(unwound))
		}
		(Op::Redact(..), Op::Unwind(..)) => delegate(left, right),
		// A read and a scripted map over the same read become a fold of two
		// arms sharing that read, one renamed per side
		(Op::Read(_), Op::Map(msrc, function)) if msrc == left => {
			let head = left
				.clone()
				.project(Reshape::field(LEFT_NAME, Expr::Var(DocVar::Root)), IdHandling::Include);
			let arm = left
				.clone()
				.project(Reshape::field(EXPR_NAME, Expr::Var(DocVar::Root)), IdHandling::Include)
				.map(function.clone())
				.project(Reshape::field(RIGHT_NAME, Expr::Var(DocVar::Root)), IdHandling::Include);
			((left_var(), right_var()), Workflow::fold_left(head, arm, []))
		}
		(Op::Map(msrc, _), Op::Read(_)) if msrc == right => delegate(left, right),
		(Op::Map(..), Op::Project(rsrc, shape, id)) => {
			let ((lb, rb), src) = merge(left, rsrc);
			let shape = Reshape::from(map! {
				LEFT_NAME => ShapeField::Expr(Expr::Var(lb)),
				RIGHT_NAME => ShapeField::Shape(shape.map_up(&|v| rb.concat(v))),
			});
			(
				(left_var(), right_var()),
				src.project(shape, id.combine(IdHandling::Include)),
			)
		}
		(Op::Project(..), Op::Map(..)) => delegate(left, right),
		// Both sides must be pipeline-shaped here: reparenting a stage over
		// the merge of anything else would lift it out of its own operand
		(l, r) if pipeline_shaped(l) && r.is_pipelineable() && r.is_single_source() => {
			descend_right(left, right)
		}
		(l, r) if l.is_pipelineable() && l.is_single_source() && pipeline_shaped(r) => {
			delegate(left, right)
		}
		_ => fold_arms(left, right),
	}
}

/// Check if a tree crushes to a pipeline: a source, or a pipelineable
/// operator over one input.
fn pipeline_shaped(op: &Op) -> bool {
	op.is_source() || (op.is_pipelineable() && op.is_single_source())
}

/// Run the reversed merge and swap the returned bases.
fn delegate(left: &Workflow, right: &Workflow) -> ((DocVar, DocVar), Workflow) {
	let ((right_base, left_base), merged) = merge(right, left);
	((left_base, right_base), merged)
}

/// Rewrite an operator being re-hosted over a merged source. The base resets
/// to the root if and only if the operator replaces the document.
fn rewrite(op: &Op, base: &DocVar) -> (Op, DocVar) {
	let rewritten = rebase(op, base);
	let base = match rewritten {
		Op::Group(..) | Op::Project(..) => DocVar::Root,
		_ => base.clone(),
	};
	(rewritten, base)
}

/// Merge the left tree with the right operator's source, then reparent the
/// rewritten right operator over the result.
fn descend_right(left: &Workflow, right: &Workflow) -> ((DocVar, DocVar), Workflow) {
	let Some(rsrc) = right.src() else {
		return fold_arms(left, right);
	};
	let ((lb, rb), src) = merge(left, rsrc);
	let (op, rb) = rewrite(right.as_op(), &rb);
	((lb, rb), coalesce(op.reparent(src)))
}

/// Merge two groups over the same key into one, relocating every grouped
/// value through fresh temporary names. The trailing projection is mandatory
/// here: the engine forbids nested structure inside a group's output.
fn merge_groups(
	lsrc: &Workflow,
	lg: &Grouped,
	lby: &GroupBy,
	rsrc: &Workflow,
	rg: &Grouped,
	rby: &GroupBy,
	right: &Workflow,
) -> ((DocVar, DocVar), Workflow) {
	let ((lb, rb), src) = merge(lsrc, rsrc);
	let rebased_lby = lby.map_up(&|v| lb.concat(v));
	let rebased_rby = rby.map_up(&|v| rb.concat(v));
	if rebased_lby != rebased_rby {
		// Different keys: treat the right group as any other pipeline
		return merge_group_any(lsrc, lg, lby, right);
	}
	let existing: BTreeSet<String> =
		lg.0.keys().chain(rg.0.keys()).cloned().collect();
	let names = FieldPath::gen_uniq_names(lg.0.len() + rg.0.len(), &existing);
	let (left_names, right_names) = names.split_at(lg.0.len());
	let mut combined = BTreeMap::new();
	let mut left_shape = BTreeMap::new();
	let mut right_shape = BTreeMap::new();
	for ((key, accumulator), name) in lg.0.iter().zip(left_names) {
		combined.insert(name.clone(), accumulator.map_up(&|v| lb.concat(v)));
		left_shape.insert(key.clone(), ShapeField::Expr(Expr::field(name.as_str())));
	}
	for ((key, accumulator), name) in rg.0.iter().zip(right_names) {
		combined.insert(name.clone(), accumulator.map_up(&|v| rb.concat(v)));
		right_shape.insert(key.clone(), ShapeField::Expr(Expr::field(name.as_str())));
	}
	let shape = Reshape::from(map! {
		LEFT_NAME => ShapeField::Shape(Reshape(left_shape)),
		RIGHT_NAME => ShapeField::Shape(Reshape(right_shape)),
	});
	let merged = src.group(Grouped(combined), rebased_lby).project(shape, IdHandling::Ignore);
	((left_var(), right_var()), merged)
}

/// Merge a group with an arbitrary pipeline by pushing the other side's
/// value under a fresh field of the grouped map, then unwinding it.
fn merge_group_any(
	lsrc: &Workflow,
	lg: &Grouped,
	lby: &GroupBy,
	right: &Workflow,
) -> ((DocVar, DocVar), Workflow) {
	let ((lb, rb), src) = merge(lsrc, right);
	let existing: BTreeSet<String> = lg.0.keys().cloned().collect();
	let unique = FieldPath::gen_uniq_name(&existing);
	let mut grouped: BTreeMap<String, Accumulator> =
		lg.0.iter().map(|(key, acc)| (key.clone(), acc.map_up(&|v| lb.concat(v)))).collect();
	grouped.insert(unique.clone(), Accumulator::Push(Expr::Var(rb)));
	let by = lby.map_up(&|v| lb.concat(v));
	let merged = src.group(Grouped(grouped), by).unwind(DocVar::field(unique.as_str()));
	((DocVar::Root, DocVar::field(unique.as_str())), merged)
}

/// The fallback: fold the two trees side by side, each arm renaming its
/// root to the reserved name of its side.
fn fold_arms(left: &Workflow, right: &Workflow) -> ((DocVar, DocVar), Workflow) {
	trace!("no merge rule matched; folding the operands side by side");
	let head = left
		.clone()
		.project(Reshape::field(LEFT_NAME, Expr::Var(DocVar::Root)), IdHandling::Include);
	let arm = right
		.clone()
		.project(Reshape::field(RIGHT_NAME, Expr::Var(DocVar::Root)), IdHandling::Include);
	((left_var(), right_var()), Workflow::fold_left(head, arm, []))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::expr::Selector;
	use crate::js;

	fn read() -> Workflow {
		Workflow::read("zips")
	}

	fn root() -> Expr {
		Expr::Var(DocVar::Root)
	}

	#[test]
	fn merging_a_tree_with_itself_is_the_identity() {
		let tree = read().match_(Selector::eq("a", 1)).limit(10);
		assert_eq!(merge(&tree, &tree), ((DocVar::Root, DocVar::Root), tree));
	}

	#[test]
	fn two_pures_merge_into_one_literal() {
		let left = Workflow::pure(Bson::Int(1));
		let right = Workflow::pure(Bson::Int(2));
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			Workflow::pure(Bson::Doc(Document::from(map! {
				LEFT_NAME => Bson::Int(1),
				RIGHT_NAME => Bson::Int(2),
			})))
		);
	}

	#[test]
	fn pure_against_read_projects_the_literal_in() {
		let left = Workflow::pure(Bson::Int(7));
		let ((lb, rb), merged) = merge(&left, &read());
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			read().project(
				Reshape::from(map! {
					LEFT_NAME => ShapeField::Expr(Expr::Literal(Bson::Int(7))),
					RIGHT_NAME => ShapeField::Expr(root()),
				}),
				IdHandling::Include
			)
		);
	}

	#[test]
	fn project_sharing_the_other_side_wraps_in_place() {
		let shape = Reshape::field("a", Expr::field("x"));
		let left = read().project(shape.clone(), IdHandling::Ignore);
		let ((lb, rb), merged) = merge(&left, &read());
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			read().project(
				Reshape::from(map! {
					LEFT_NAME => ShapeField::Shape(shape),
					RIGHT_NAME => ShapeField::Expr(root()),
				}),
				IdHandling::Include
			)
		);
	}

	#[test]
	fn compatible_projects_merge_into_one() {
		let left = read().project(Reshape::field("a", Expr::field("x")), IdHandling::Ignore);
		let right = read().project(Reshape::field("b", Expr::field("y")), IdHandling::Exclude);
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (DocVar::Root, DocVar::Root));
		assert_eq!(
			merged,
			read().project(
				Reshape::from(map! {
					"a" => ShapeField::Expr(Expr::field("x")),
					"b" => ShapeField::Expr(Expr::field("y")),
				}),
				IdHandling::Exclude
			)
		);
	}

	#[test]
	fn conflicting_projects_are_kept_side_by_side() {
		let ls = Reshape::field("a", Expr::field("x"));
		let rs = Reshape::field("a", Expr::field("y"));
		let left = read().project(ls.clone(), IdHandling::Ignore);
		let right = read().project(rs.clone(), IdHandling::Ignore);
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			read().project(
				Reshape::from(map! {
					LEFT_NAME => ShapeField::Shape(ls),
					RIGHT_NAME => ShapeField::Shape(rs),
				}),
				IdHandling::Ignore
			)
		);
	}

	#[test]
	fn read_against_map_folds_over_the_shared_read() {
		let function = js::identity();
		let left = read();
		let right = read().map(function.clone());
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		let head = read()
			.project(Reshape::field(LEFT_NAME, root()), IdHandling::Include);
		let arm = read()
			.project(Reshape::field(EXPR_NAME, root()), IdHandling::Include)
			.map(function)
			.project(Reshape::field(RIGHT_NAME, root()), IdHandling::Include);
		assert_eq!(merged, Workflow::fix(Op::FoldLeft(head, vec![arm])));
	}

	#[test]
	fn map_against_read_delegates_and_swaps_the_bases() {
		let left = read().map(js::identity());
		let right = read();
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (right_var(), left_var()));
		// Same tree as the primary direction
		assert_eq!(merged, merge(&right, &left).1);
	}

	#[rstest]
	#[case::pure_and_read(Workflow::pure(Bson::Int(1)), read())]
	#[case::project_and_source(
		read().project(Reshape::field("a", Expr::field("x")), IdHandling::Ignore),
		read()
	)]
	#[case::match_and_project(
		read().match_(Selector::eq("a", 1)),
		read().project(Reshape::field("a", Expr::field("a")), IdHandling::Ignore)
	)]
	#[case::read_and_map(read(), read().map(js::identity()))]
	#[case::group_and_redact(
		read().group(
			Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("pop")) }),
			GroupBy::Expr(Expr::field("state"))
		),
		read().redact(Expr::field("level"))
	)]
	fn merge_is_symmetric(#[case] left: Workflow, #[case] right: Workflow) {
		let ((lb, rb), merged) = merge(&left, &right);
		let ((rb2, lb2), merged2) = merge(&right, &left);
		assert_eq!((lb, rb), (lb2, rb2));
		assert_eq!(merged, merged2);
	}

	#[test]
	fn shape_preserving_left_reparents_the_right() {
		let left = read().match_(Selector::eq("a", 1));
		let right = read().limit(10);
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (DocVar::Root, DocVar::Root));
		assert_eq!(merged, read().match_(Selector::eq("a", 1)).limit(10));
	}

	#[test]
	fn unwind_against_its_own_group_is_not_duplicated() {
		let grouped = Grouped::from(map! {
			"items" => Accumulator::Push(Expr::field("item")),
		});
		let by = GroupBy::Expr(Expr::field("state"));
		let group = read().group(grouped, by);
		let left = group.clone().unwind(DocVar::field("items"));
		let ((lb, rb), merged) = merge(&left, &group);
		// The shared group is merged once, with the unwind back on top
		assert_eq!((lb, rb), (DocVar::Root, DocVar::Root));
		assert_eq!(merged, left);
	}

	#[test]
	fn groups_with_the_same_key_merge_through_temporaries() {
		let by = GroupBy::Expr(Expr::field("state"));
		let left = read().group(
			Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("pop")) }),
			by.clone(),
		);
		let right = read().group(
			Grouped::from(map! { "n" => Accumulator::Sum(Expr::Literal(Bson::Int(1))) }),
			by.clone(),
		);
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			read()
				.group(
					Grouped::from(map! {
						"__tmp0" => Accumulator::Sum(Expr::field("pop")),
						"__tmp1" => Accumulator::Sum(Expr::Literal(Bson::Int(1))),
					}),
					by
				)
				.project(
					Reshape::from(map! {
						LEFT_NAME => ShapeField::Shape(
							Reshape::field("total", Expr::field("__tmp0"))
						),
						RIGHT_NAME => ShapeField::Shape(
							Reshape::field("n", Expr::field("__tmp1"))
						),
					}),
					IdHandling::Ignore
				)
		);
	}

	#[test]
	fn group_against_redact_pushes_through_an_array() {
		let by = GroupBy::Expr(Expr::field("state"));
		let left = read().group(
			Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("pop")) }),
			by.clone(),
		);
		let right = read().redact(Expr::field("level"));
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!(lb, DocVar::Root);
		assert_eq!(rb, DocVar::field("__tmp0"));
		assert_eq!(
			merged,
			read()
				.redact(Expr::field("level"))
				.group(
					Grouped::from(map! {
						"total" => Accumulator::Sum(Expr::field("pop")),
						"__tmp0" => Accumulator::Push(root()),
					}),
					by
				)
				.unwind(DocVar::field("__tmp0"))
		);
	}

	#[test]
	fn identical_unwinds_merge_into_one() {
		let left = read().match_(Selector::eq("a", 1)).unwind(DocVar::field("tags"));
		let right = read().unwind(DocVar::field("tags"));
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (DocVar::Root, DocVar::Root));
		assert_eq!(merged, read().match_(Selector::eq("a", 1)).unwind(DocVar::field("tags")));
	}

	#[test]
	fn distinct_unwinds_are_both_kept_in_order() {
		let left = read().match_(Selector::eq("a", 1)).unwind(DocVar::field("tags"));
		let right = read().unwind(DocVar::field("links"));
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (DocVar::Root, DocVar::Root));
		assert_eq!(
			merged,
			read()
				.match_(Selector::eq("a", 1))
				.unwind(DocVar::field("tags"))
				.unwind(DocVar::field("links"))
		);
	}

	#[test]
	fn scripted_operand_against_a_pipeline_folds_with_the_stage_inside() {
		let left = read().reduce(js::nop_reduce());
		let right = read().limit(5);
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		// The limit caps the read inside the right arm; it must not be
		// reparented over the fold, where it would cap the merged output
		assert_eq!(
			merged,
			Workflow::fix(Op::FoldLeft(
				left.project(Reshape::field(LEFT_NAME, root()), IdHandling::Include),
				vec![right.project(Reshape::field(RIGHT_NAME, root()), IdHandling::Include)],
			))
		);
	}

	#[test]
	fn pipeline_operand_against_a_scripted_chain_folds_the_same_way() {
		let capped = read().limit(5);
		let scripted = read().reduce(js::nop_reduce());
		let ((lb, rb), merged) = merge(&capped, &scripted);
		assert_eq!((lb, rb), (left_var(), right_var()));
		assert_eq!(
			merged,
			Workflow::fix(Op::FoldLeft(
				capped.project(Reshape::field(LEFT_NAME, root()), IdHandling::Include),
				vec![scripted.project(Reshape::field(RIGHT_NAME, root()), IdHandling::Include)],
			))
		);
	}

	#[test]
	fn unrelated_scripted_chains_fall_back_to_a_fold() {
		let left = read().map(js::identity()).reduce(js::nop_reduce());
		let right = Workflow::read("postcodes").map(js::identity());
		let ((lb, rb), merged) = merge(&left, &right);
		assert_eq!((lb, rb), (left_var(), right_var()));
		let Op::FoldLeft(head, tail) = merged.as_op() else {
			panic!("expected a fold");
		};
		assert!(matches!(head.as_op(), Op::Project(..)));
		assert_eq!(tail.len(), 1);
	}
}
