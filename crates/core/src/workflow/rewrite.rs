//! The reference rewriter: applies a path substitution to every field and
//! variable reference inside one operator. The operator variant never
//! changes; only leaf paths move. A substitution that would relocate a
//! positional reference (a sort key, an unwind target) onto the document
//! root has no meaning and aborts the compile.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::err::Error;
use crate::expr::{DocVar, Selector, SortKey};
use crate::workflow::{GeoNearParams, Op};

/// The multiset of document variables referenced by one operator.
pub fn refs(op: &Op) -> Vec<DocVar> {
	let mut collected = Vec::new();
	each_ref(op, &mut |var| collected.push(var.clone()));
	collected
}

/// Visit every document variable referenced by one operator.
pub(crate) fn each_ref(op: &Op, f: &mut impl FnMut(&DocVar)) {
	match op {
		Op::Match(_, selector) => each_selector_ref(selector, f),
		Op::Project(_, shape, _) => shape.each_var(f),
		Op::Redact(_, expr) => expr.each_var(f),
		Op::Unwind(_, field) => f(field),
		Op::Group(_, grouped, by) => {
			grouped.each_var(f);
			by.each_var(f);
		}
		Op::Sort(_, keys) => {
			for key in keys {
				f(&DocVar::Field(key.field.clone()));
			}
		}
		Op::GeoNear(_, params) => {
			f(&DocVar::Field(params.distance_field.clone()));
			if let Some(selector) = &params.query {
				each_selector_ref(selector, f);
			}
			if let Some(locs) = &params.include_locs {
				f(&DocVar::Field(locs.clone()));
			}
		}
		Op::Pure(_)
		| Op::Read(_)
		| Op::Limit(..)
		| Op::Skip(..)
		| Op::Out(..)
		| Op::Map(..)
		| Op::FlatMap(..)
		| Op::Reduce(..)
		| Op::FoldLeft(..)
		| Op::Join(_) => (),
	}
}

fn each_selector_ref(selector: &Selector, f: &mut impl FnMut(&DocVar)) {
	match selector {
		Selector::Doc(fields) => {
			for path in fields.keys() {
				f(&DocVar::Field(path.clone()));
			}
		}
		Selector::And(items) | Selector::Or(items) | Selector::Nor(items) => {
			for item in items {
				each_selector_ref(item, f);
			}
		}
		Selector::Where(_) => (),
	}
}

/// Apply a path substitution to every reference inside one operator.
///
/// `f` returns `None` for paths it leaves alone. The result is always the
/// same variant over the same children; only references move.
pub fn rewrite_refs(op: &Op, f: &impl Fn(&DocVar) -> Option<DocVar>) -> Result<Op> {
	let total = |var: &DocVar| f(var).unwrap_or_else(|| var.clone());
	Ok(match op {
		Op::Match(src, selector) => {
			Op::Match(src.clone(), rewrite_selector(selector, &total)?)
		}
		Op::Project(src, shape, id) => Op::Project(src.clone(), shape.map_up(&total), *id),
		Op::Redact(src, expr) => Op::Redact(src.clone(), expr.map_up(&total)),
		Op::Unwind(src, field) => match total(field) {
			DocVar::Root => {
				return Err(Error::InvalidRewrite(format!("the unwind target {field}")).into());
			}
			field => Op::Unwind(src.clone(), field),
		},
		Op::Group(src, grouped, by) => {
			Op::Group(src.clone(), grouped.map_up(&total), by.map_up(&total))
		}
		Op::Sort(src, keys) => {
			let keys = keys
				.iter()
				.map(|key| match total(&DocVar::Field(key.field.clone())) {
					DocVar::Field(field) => Ok(SortKey {
						field,
						direction: key.direction,
					}),
					DocVar::Root => Err(anyhow::Error::new(Error::InvalidRewrite(format!(
						"the sort key {}",
						key.field
					)))),
				})
				.collect::<Result<Vec<_>>>()?;
			Op::Sort(src.clone(), keys)
		}
		Op::GeoNear(src, params) => {
			let distance_field = match total(&DocVar::Field(params.distance_field.clone())) {
				DocVar::Field(field) => field,
				DocVar::Root => {
					return Err(Error::InvalidRewrite(format!(
						"the distance field {}",
						params.distance_field
					))
					.into());
				}
			};
			let query = match &params.query {
				Some(selector) => Some(rewrite_selector(selector, &total)?),
				None => None,
			};
			let include_locs = match &params.include_locs {
				Some(locs) => match total(&DocVar::Field(locs.clone())) {
					DocVar::Field(field) => Some(field),
					DocVar::Root => {
						return Err(Error::InvalidRewrite(format!(
							"the located field {locs}"
						))
						.into());
					}
				},
				None => None,
			};
			Op::GeoNear(
				src.clone(),
				GeoNearParams {
					distance_field,
					query,
					include_locs,
					..params.clone()
				},
			)
		}
		op => op.clone(),
	})
}

fn rewrite_selector(selector: &Selector, f: &impl Fn(&DocVar) -> DocVar) -> Result<Selector> {
	match selector {
		Selector::Doc(fields) => {
			let fields = fields
				.iter()
				.map(|(path, condition)| match f(&DocVar::Field(path.clone())) {
					DocVar::Field(path) => Ok((path, condition.clone())),
					DocVar::Root => Err(anyhow::Error::new(Error::InvalidRewrite(format!(
						"the selector field {path}"
					)))),
				})
				.collect::<Result<BTreeMap<_, _>>>()?;
			Ok(Selector::Doc(fields))
		}
		Selector::And(items) => Ok(Selector::And(
			items.iter().map(|item| rewrite_selector(item, f)).collect::<Result<_>>()?,
		)),
		Selector::Or(items) => Ok(Selector::Or(
			items.iter().map(|item| rewrite_selector(item, f)).collect::<Result<_>>()?,
		)),
		Selector::Nor(items) => Ok(Selector::Nor(
			items.iter().map(|item| rewrite_selector(item, f)).collect::<Result<_>>()?,
		)),
		Selector::Where(body) => Ok(Selector::Where(body.clone())),
	}
}

/// Prefix every reference in one operator with `base`.
///
/// Rebasing cannot fail: prefixing a field path with another always yields a
/// field path, and a root base leaves the operator untouched.
pub(crate) fn rebase(op: &Op, base: &DocVar) -> Op {
	if base.is_root() {
		return op.clone();
	}
	rewrite_refs(op, &|var| Some(base.concat(var)))
		.expect("prefixing a reference cannot relocate it onto the document root")
}
