//! Peephole fusion performed at construction time. Every smart constructor
//! routes the operator it just built through [`coalesce`], which looks one
//! layer down and fuses compatible neighbours. It never recurses further:
//! children were themselves built through smart constructors, so the tree
//! below is already in normal form.

use crate::js;
use crate::workflow::inline::{
	inline_group_projects, inline_project, inline_project_group, inline_project_unwind_group,
};
use crate::workflow::{IdHandling, Op, Workflow};

/// Fuse a freshly built operator with its immediate child where a rule
/// applies. Unknown combinations are returned unchanged: the coalescer
/// never invents semantics.
pub(crate) fn coalesce(op: Op) -> Workflow {
	match try_coalesce(&op) {
		Some(fused) => fused,
		None => Workflow::fix(op),
	}
}

fn try_coalesce(op: &Op) -> Option<Workflow> {
	match op {
		Op::Match(src, selector) => match src.as_op() {
			// A filter slides below an adjacent sort
			Op::Sort(inner, keys) => {
				Some(inner.clone().match_(selector.clone()).sort(keys.clone()))
			}
			// Adjacent filters fuse, earlier selector first
			Op::Match(inner, first) => {
				Some(inner.clone().match_(first.clone().and(selector.clone())))
			}
			_ => None,
		},
		Op::Project(src, shape, id) => match src.as_op() {
			Op::Project(inner, below, below_id) => inline_project(shape, &[below])
				.map(|fused| inner.clone().project(fused, below_id.chain(*id))),
			Op::Group(inner, grouped, by) if *id != IdHandling::Exclude => {
				inline_project_group(shape, grouped)
					.map(|fused| inner.clone().group(fused, by.clone()))
			}
			Op::Unwind(inner, field) if *id != IdHandling::Exclude => match inner.as_op() {
				Op::Group(below, grouped, by) => {
					inline_project_unwind_group(shape, field, grouped).map(
						|(unwound, fused)| {
							below.clone().group(fused, by.clone()).unwind(unwound)
						},
					)
				}
				_ => None,
			},
			_ => None,
		},
		Op::Limit(src, count) => match src.as_op() {
			Op::Limit(inner, below) => Some(inner.clone().limit((*below).min(*count))),
			Op::Skip(inner, skipped) => {
				Some(inner.clone().limit(skipped + count).skip(*skipped))
			}
			_ => None,
		},
		Op::Skip(src, count) => match src.as_op() {
			Op::Skip(inner, below) => Some(inner.clone().skip(below + count)),
			_ => None,
		},
		Op::Group(src, grouped, by) => inline_group_projects(src, grouped, by)
			.map(|(inner, grouped, by)| Workflow::fix(Op::Group(inner, grouped, by))),
		Op::Map(src, g) => match src.as_op() {
			Op::Map(inner, f) => Some(inner.clone().map(js::compose(g, f))),
			Op::FlatMap(inner, f) => Some(inner.clone().flat_map(js::map_compose(g, f))),
			_ => None,
		},
		Op::FlatMap(src, g) => match src.as_op() {
			Op::Map(inner, f) => Some(inner.clone().flat_map(js::compose(g, f))),
			Op::FlatMap(inner, f) => Some(inner.clone().flat_map(js::kleisli(g, f))),
			_ => None,
		},
		Op::FoldLeft(head, tail) => match head.as_op() {
			// Nested folds flatten into one, arms in order
			Op::FoldLeft(inner_head, inner_tail) => {
				let mut arms = inner_tail.clone();
				arms.extend(tail.iter().cloned());
				Some(Workflow::fix(Op::FoldLeft(inner_head.clone(), arms)))
			}
			_ => None,
		},
		// Writing a freshly read collection back collapses to the read
		Op::Out(src, _) if matches!(src.as_op(), Op::Read(_)) => Some(src.clone()),
		// TODO: combine adjacent geo-near stages once a parameter merge is specified
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expr::{
		Accumulator, DocVar, Expr, GroupBy, Grouped, Reshape, Selector, ShapeField, SortKey,
	};
	use crate::val::Bson;
	use crate::workflow::IdHandling;

	fn read() -> Workflow {
		Workflow::read("zips")
	}

	#[test]
	fn match_match_fuses_selectors() {
		let a = Selector::eq("a", 1);
		let b = Selector::eq("b", 2);
		let fused = read().match_(a.clone()).match_(b.clone());
		assert_eq!(fused, read().match_(a.and(b)));
	}

	#[test]
	fn match_slides_below_sort() {
		let sel = Selector::eq("a", 1);
		let keys = vec![SortKey::asc("a")];
		let built = read().sort(keys.clone()).match_(sel.clone());
		assert_eq!(built, Workflow::fix(Op::Sort(read().match_(sel), keys)));
	}

	#[test]
	fn limit_limit_takes_minimum() {
		assert_eq!(read().limit(10).limit(3), read().limit(3));
		assert_eq!(read().limit(3).limit(10), read().limit(3));
	}

	#[test]
	fn skip_skip_adds() {
		assert_eq!(read().skip(4).skip(6), read().skip(10));
	}

	#[test]
	fn limit_after_skip_swaps_and_widens() {
		assert_eq!(read().skip(5).limit(3), read().limit(8).skip(5));
	}

	#[test]
	fn project_project_inlines() {
		let below = Reshape::field("a", Expr::field("x"));
		let above = Reshape::field("b", Expr::field("a"));
		let fused = read()
			.project(below, IdHandling::Include)
			.project(above, IdHandling::Exclude);
		assert_eq!(
			fused,
			read().project(Reshape::field("b", Expr::field("x")), IdHandling::Exclude)
		);
	}

	#[test]
	fn project_project_chain_respects_ignore() {
		let below = Reshape::field("a", Expr::field("x"));
		let above = Reshape::field("b", Expr::field("a"));
		let fused =
			read().project(below, IdHandling::Exclude).project(above, IdHandling::Ignore);
		assert_eq!(
			fused,
			read().project(Reshape::field("b", Expr::field("x")), IdHandling::Exclude)
		);
	}

	#[test]
	fn project_project_without_inline_stays() {
		let below = Reshape::field("a", Expr::field("x"));
		// References a field the lower projection does not produce
		let above = Reshape::field("b", Expr::field("missing"));
		let built = read()
			.project(below.clone(), IdHandling::Ignore)
			.project(above.clone(), IdHandling::Ignore);
		assert_eq!(
			built,
			Workflow::fix(Op::Project(
				read().project(below, IdHandling::Ignore),
				above,
				IdHandling::Ignore
			))
		);
	}

	#[test]
	fn project_group_renames_accumulators() {
		let grouped = Grouped::from(map! {
			"total" => Accumulator::Sum(Expr::field("pop")),
			"n" => Accumulator::Sum(Expr::Literal(Bson::Int(1))),
		});
		let by = GroupBy::Expr(Expr::field("state"));
		let shape = Reshape::field("population", Expr::field("total"));
		let fused = read().group(grouped, by.clone()).project(shape, IdHandling::Ignore);
		assert_eq!(
			fused,
			read().group(
				Grouped::from(map! { "population" => Accumulator::Sum(Expr::field("pop")) }),
				by
			)
		);
	}

	#[test]
	fn project_group_exclude_id_is_not_inlined() {
		let grouped = Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("pop")) });
		let by = GroupBy::Expr(Expr::field("state"));
		let shape = Reshape::field("population", Expr::field("total"));
		let built =
			read().group(grouped.clone(), by.clone()).project(shape.clone(), IdHandling::Exclude);
		assert_eq!(
			built,
			Workflow::fix(Op::Project(read().group(grouped, by), shape, IdHandling::Exclude))
		);
	}

	#[test]
	fn project_unwind_group_keeps_unwind() {
		let grouped = Grouped::from(map! { "items" => Accumulator::Push(Expr::field("item")) });
		let by = GroupBy::Expr(Expr::field("state"));
		let shape = Reshape::field("article", Expr::field("items"));
		let fused = read()
			.group(grouped, by.clone())
			.unwind(DocVar::field("items"))
			.project(shape, IdHandling::Ignore);
		assert_eq!(
			fused,
			read()
				.group(
					Grouped::from(map! { "article" => Accumulator::Push(Expr::field("item")) }),
					by
				)
				.unwind(DocVar::field("article"))
		);
	}

	#[test]
	fn group_inlines_projects_below() {
		let shape = Reshape::field("a", Expr::field("x.y"));
		let grouped = Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("a")) });
		let by = GroupBy::Expr(Expr::Literal(Bson::Int(1)));
		let fused = read().project(shape, IdHandling::Ignore).group(grouped, by.clone());
		assert_eq!(
			fused,
			read().group(
				Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("x.y")) }),
				by
			)
		);
	}

	#[test]
	fn map_map_composes() {
		let f = js::identity();
		let g = js::nop_reduce();
		assert_eq!(read().map(f.clone()).map(g.clone()), read().map(js::compose(&g, &f)));
	}

	#[test]
	fn map_after_flat_map_composes() {
		let f = js::identity();
		let g = js::nop_reduce();
		assert_eq!(
			read().flat_map(f.clone()).map(g.clone()),
			read().flat_map(js::map_compose(&g, &f))
		);
	}

	#[test]
	fn flat_map_after_map_composes() {
		let f = js::identity();
		let g = js::nop_reduce();
		assert_eq!(
			read().map(f.clone()).flat_map(g.clone()),
			read().flat_map(js::compose(&g, &f))
		);
	}

	#[test]
	fn flat_map_flat_map_kleisli_composes() {
		let f = js::identity();
		let g = js::nop_reduce();
		assert_eq!(
			read().flat_map(f.clone()).flat_map(g.clone()),
			read().flat_map(js::kleisli(&g, &f))
		);
	}

	#[test]
	fn fold_left_flattens() {
		let arm = || read().limit(1);
		let inner = Workflow::fold_left(read(), arm(), []);
		let flattened = Workflow::fold_left(inner, arm().skip(1), []);
		assert_eq!(
			flattened,
			Workflow::fix(Op::FoldLeft(read(), vec![arm(), arm().skip(1)]))
		);
	}

	#[test]
	fn out_after_read_collapses() {
		assert_eq!(read().out("elsewhere"), read());
	}

	#[test]
	fn geo_near_after_geo_near_is_untouched() {
		let params = crate::workflow::GeoNearParams {
			near: (3.2, 51.1),
			distance_field: "dist".into(),
			limit: None,
			max_distance: None,
			query: None,
			spherical: true,
			distance_multiplier: None,
			include_locs: None,
			unique_docs: false,
		};
		let built = read().geo_near(params.clone()).geo_near(params.clone());
		assert_eq!(
			built,
			Workflow::fix(Op::GeoNear(read().geo_near(params.clone()), params))
		);
	}

	#[test]
	fn rebuilding_a_coalesced_tree_is_stable() {
		// Re-applying the constructors of an already-coalesced tree
		// reproduces it exactly
		let tree = read()
			.match_(Selector::eq("a", 1))
			.project(Reshape::field("b", Expr::field("a")), IdHandling::Ignore)
			.limit(10);
		let rebuilt = match tree.as_op() {
			Op::Limit(src, n) => {
				let below = match src.as_op() {
					Op::Project(inner, shape, id) => {
						inner.clone().project(shape.clone(), *id)
					}
					_ => panic!("expected a projection"),
				};
				below.limit(*n)
			}
			_ => panic!("expected a limit"),
		};
		assert_eq!(rebuilt, tree);
	}

	#[test]
	fn unknown_combinations_are_untouched() {
		let shape = Reshape::from(map! { "a" => ShapeField::Expr(Expr::field("x")) });
		let built = read().unwind(DocVar::field("a")).project(shape.clone(), IdHandling::Ignore);
		assert_eq!(
			built,
			Workflow::fix(Op::Project(
				read().unwind(DocVar::field("a")),
				shape,
				IdHandling::Ignore
			))
		);
	}
}
