//! Optional inlining of projections into their neighbours. Each helper
//! returns `None` when the fusion does not apply; the coalescer then keeps
//! the operators separate. Failure here is expected, never an error.

use std::collections::BTreeMap;

use crate::expr::{DocVar, Expr, GroupBy, Grouped, Reshape, ShapeField};
use crate::workflow::{Op, Workflow};

/// Resolve a document variable against the output of a projection shape.
fn resolve_var(def: &Reshape, var: &DocVar) -> Option<ShapeField> {
	match var {
		DocVar::Root => Some(ShapeField::Shape(def.clone())),
		DocVar::Field(path) => def.get(path).cloned(),
	}
}

/// Resolve a variable to an expression; a nested shape is not an expression.
fn resolve_expr(def: &Reshape, var: &DocVar) -> Option<Expr> {
	match resolve_var(def, var)? {
		ShapeField::Expr(e) => Some(e),
		ShapeField::Shape(_) => None,
	}
}

/// Inline a projection through the projections directly below it, nearest
/// first. Succeeds only if every reference resolves.
pub(crate) fn inline_project(shape: &Reshape, defs: &[&Reshape]) -> Option<Reshape> {
	let mut current = shape.clone();
	for def in defs {
		current = inline_shape(&current, def)?;
	}
	Some(current)
}

fn inline_shape(shape: &Reshape, def: &Reshape) -> Option<Reshape> {
	let mut fields = BTreeMap::new();
	for (name, field) in &shape.0 {
		let inlined = match field {
			// A bare reference may resolve to a nested shape
			ShapeField::Expr(Expr::Var(var)) => resolve_var(def, var)?,
			// Inside a compound expression every reference must stay an expression
			ShapeField::Expr(e) => ShapeField::Expr(e.substitute(&|v| resolve_expr(def, v))?),
			ShapeField::Shape(inner) => ShapeField::Shape(inline_shape(inner, def)?),
		};
		fields.insert(name.clone(), inlined);
	}
	Some(Reshape(fields))
}

/// Inline a projection applied after a group. Only pure renames of the
/// grouped fields can stay inside the group: the engine forbids computed or
/// nested structure in a group's output.
pub(crate) fn inline_project_group(shape: &Reshape, grouped: &Grouped) -> Option<Grouped> {
	let mut fields = BTreeMap::new();
	for (name, field) in &shape.0 {
		let accumulator = grouped.0.get(grouped_key(field)?)?;
		fields.insert(name.clone(), accumulator.clone());
	}
	Some(Grouped(fields))
}

/// Inline a projection applied after an unwound group. The unwound field
/// must survive under exactly one name, which becomes the new unwind target.
pub(crate) fn inline_project_unwind_group(
	shape: &Reshape,
	unwound: &DocVar,
	grouped: &Grouped,
) -> Option<(DocVar, Grouped)> {
	let unwound_key = match unwound.path() {
		Some(path) if path.segments().len() == 1 => path.head(),
		_ => return None,
	};
	let mut fields = BTreeMap::new();
	let mut renamed = None;
	for (name, field) in &shape.0 {
		let key = grouped_key(field)?;
		let accumulator = grouped.0.get(key)?;
		fields.insert(name.clone(), accumulator.clone());
		if key == unwound_key {
			if renamed.is_some() {
				// Duplicating the unwound field would duplicate the unwind
				return None;
			}
			renamed = Some(DocVar::field(name.as_str()));
		}
	}
	renamed.map(|unwound| (unwound, Grouped(fields)))
}

/// The single grouped field a shape entry renames, if it is a pure rename.
fn grouped_key(field: &ShapeField) -> Option<&str> {
	match field {
		ShapeField::Expr(Expr::Var(DocVar::Field(path))) if path.segments().len() == 1 => {
			Some(path.head())
		}
		_ => None,
	}
}

/// Inline the chain of projections directly below a group into the group's
/// accumulators and key. Returns the innermost source together with the
/// rewritten group parts, or `None` if there is nothing to inline.
pub(crate) fn inline_group_projects(
	src: &Workflow,
	grouped: &Grouped,
	by: &GroupBy,
) -> Option<(Workflow, Grouped, GroupBy)> {
	let mut current = src.clone();
	let mut grouped = grouped.clone();
	let mut by = by.clone();
	let mut inlined = false;
	loop {
		let (inner, shape) = match current.as_op() {
			Op::Project(inner, shape, _) => (inner.clone(), shape.clone()),
			_ => break,
		};
		let resolve = |v: &DocVar| resolve_expr(&shape, v);
		let mut fields = BTreeMap::new();
		for (name, accumulator) in &grouped.0 {
			fields.insert(name.clone(), accumulator.try_map_expr(&|e| e.substitute(&resolve))?);
		}
		by = match &by {
			GroupBy::Expr(e) => GroupBy::Expr(e.substitute(&resolve)?),
			GroupBy::Shape(r) => GroupBy::Shape(r.substitute(&resolve)?),
		};
		grouped = Grouped(fields);
		current = inner;
		inlined = true;
	}
	if inlined {
		Some((current, grouped, by))
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expr::Accumulator;
	use crate::val::Bson;

	#[test]
	fn inline_project_resolves_through_below() {
		let below = Reshape::from(map! {
			"a" => ShapeField::Expr(Expr::field("x")),
			"b" => ShapeField::Shape(Reshape::field("c", Expr::field("y"))),
		});
		let above = Reshape::from(map! {
			"total" => ShapeField::Expr(Expr::Add(
				Box::new(Expr::field("a")),
				Box::new(Expr::field("b.c")),
			)),
			"nested" => ShapeField::Expr(Expr::field("b")),
		});
		let fused = inline_project(&above, &[&below]).unwrap();
		assert_eq!(
			fused,
			Reshape::from(map! {
				"total" => ShapeField::Expr(Expr::Add(
					Box::new(Expr::field("x")),
					Box::new(Expr::field("y")),
				)),
				"nested" => ShapeField::Shape(Reshape::field("c", Expr::field("y"))),
			})
		);
	}

	#[test]
	fn inline_project_root_reference_nests_whole_shape() {
		let below = Reshape::field("a", Expr::field("x"));
		let above = Reshape::from(map! {
			"all" => ShapeField::Expr(Expr::Var(DocVar::Root)),
		});
		let fused = inline_project(&above, &[&below]).unwrap();
		assert_eq!(
			fused,
			Reshape::from(map! { "all" => ShapeField::Shape(below) })
		);
	}

	#[test]
	fn inline_project_fails_on_missing_reference() {
		let below = Reshape::field("a", Expr::field("x"));
		let above = Reshape::field("b", Expr::field("missing"));
		assert_eq!(inline_project(&above, &[&below]), None);
	}

	#[test]
	fn inline_project_group_requires_pure_renames() {
		let grouped = Grouped::from(map! {
			"total" => Accumulator::Sum(Expr::field("pop")),
		});
		let rename = Reshape::field("population", Expr::field("total"));
		assert!(inline_project_group(&rename, &grouped).is_some());

		let computed = Reshape::field(
			"population",
			Expr::Add(Box::new(Expr::field("total")), Box::new(Expr::Literal(Bson::Int(1)))),
		);
		assert_eq!(inline_project_group(&computed, &grouped), None);
	}

	#[test]
	fn inline_project_unwind_group_tracks_the_unwound_field() {
		let grouped = Grouped::from(map! {
			"items" => Accumulator::Push(Expr::field("item")),
			"n" => Accumulator::Sum(Expr::Literal(Bson::Int(1))),
		});
		let shape = Reshape::from(map! {
			"article" => ShapeField::Expr(Expr::field("items")),
			"count" => ShapeField::Expr(Expr::field("n")),
		});
		let (unwound, fused) =
			inline_project_unwind_group(&shape, &DocVar::field("items"), &grouped).unwrap();
		assert_eq!(unwound, DocVar::field("article"));
		assert_eq!(fused.0.len(), 2);

		// Dropping the unwound field blocks the inline
		let dropped = Reshape::field("count", Expr::field("n"));
		assert_eq!(
			inline_project_unwind_group(&dropped, &DocVar::field("items"), &grouped),
			None
		);
	}

	#[test]
	fn inline_group_projects_walks_the_chain() {
		let src = Workflow::read("zips")
			.project(Reshape::field("a", Expr::field("x.y")), crate::workflow::IdHandling::Ignore)
			.project(Reshape::field("b", Expr::field("a")), crate::workflow::IdHandling::Ignore);
		let grouped = Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("b")) });
		let by = GroupBy::Expr(Expr::Literal(Bson::Int(1)));
		let (inner, grouped, _) = inline_group_projects(&src, &grouped, &by).unwrap();
		assert_eq!(inner, Workflow::read("zips"));
		assert_eq!(
			grouped,
			Grouped::from(map! { "total" => Accumulator::Sum(Expr::field("x.y")) })
		);
	}
}
