use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::field::FieldPath;
use crate::val::{Bson, Document};

/// A single comparison applied to one field of a selector document.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Condition {
	Eq(Bson),
	Neq(Bson),
	Gt(Bson),
	Gte(Bson),
	Lt(Bson),
	Lte(Bson),
	In(Vec<Bson>),
	Nin(Vec<Bson>),
	Exists(bool),
	Regex(String),
}

impl Condition {
	/// Render this condition as its operator document
	pub fn bson(&self) -> Bson {
		let (op, value) = match self {
			Condition::Eq(v) => ("$eq", v.clone()),
			Condition::Neq(v) => ("$ne", v.clone()),
			Condition::Gt(v) => ("$gt", v.clone()),
			Condition::Gte(v) => ("$gte", v.clone()),
			Condition::Lt(v) => ("$lt", v.clone()),
			Condition::Lte(v) => ("$lte", v.clone()),
			Condition::In(v) => ("$in", Bson::Array(v.clone())),
			Condition::Nin(v) => ("$nin", Bson::Array(v.clone())),
			Condition::Exists(v) => ("$exists", Bson::Bool(*v)),
			Condition::Regex(v) => ("$regex", Bson::from(v.clone())),
		};
		Bson::Doc(Document::from(map! { op => value }))
	}
}

/// A filter over documents: a conjunction of per-field conditions, a boolean
/// combination of sub-selectors, or an opaque script predicate.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Selector {
	Doc(BTreeMap<FieldPath, Condition>),
	And(Vec<Selector>),
	Or(Vec<Selector>),
	Nor(Vec<Selector>),
	Where(String),
}

impl Selector {
	/// A selector testing a single field
	pub fn cond(path: impl Into<FieldPath>, condition: Condition) -> Selector {
		Selector::Doc(map! { path.into() => condition })
	}

	/// A selector testing a single field for equality
	pub fn eq(path: impl Into<FieldPath>, value: impl Into<Bson>) -> Selector {
		Selector::cond(path, Condition::Eq(value.into()))
	}

	/// A script predicate selector
	pub fn where_clause(body: impl Into<String>) -> Selector {
		Selector::Where(body.into())
	}

	/// Conjoin two selectors, this one first.
	///
	/// `And` lists flatten on both sides, which keeps the operation
	/// associative regardless of grouping.
	pub fn and(self, other: Selector) -> Selector {
		match (self, other) {
			(Selector::And(mut left), Selector::And(right)) => {
				left.extend(right);
				Selector::And(left)
			}
			(Selector::And(mut left), right) => {
				left.push(right);
				Selector::And(left)
			}
			(left, Selector::And(right)) => {
				let mut items = Vec::with_capacity(right.len() + 1);
				items.push(left);
				items.extend(right);
				Selector::And(items)
			}
			(left, right) => Selector::And(vec![left, right]),
		}
	}

	/// Check whether a script predicate occurs anywhere in this selector
	pub fn has_where(&self) -> bool {
		match self {
			Selector::Doc(_) => false,
			Selector::And(items) | Selector::Or(items) | Selector::Nor(items) => {
				items.iter().any(Selector::has_where)
			}
			Selector::Where(_) => true,
		}
	}

	/// Check whether this selector can run as a pipeline filter stage.
	///
	/// A script predicate cannot; a compound selector can only if all of its
	/// children can.
	pub fn is_pipelineable(&self) -> bool {
		match self {
			Selector::Doc(_) => true,
			Selector::And(items) | Selector::Or(items) | Selector::Nor(items) => {
				items.iter().all(Selector::is_pipelineable)
			}
			Selector::Where(_) => false,
		}
	}

	/// Apply a field renamer to every field path in this selector
	pub fn map_up_fields(&self, f: &impl Fn(&FieldPath) -> FieldPath) -> Selector {
		match self {
			Selector::Doc(fields) => {
				Selector::Doc(fields.iter().map(|(path, cond)| (f(path), cond.clone())).collect())
			}
			Selector::And(items) => {
				Selector::And(items.iter().map(|s| s.map_up_fields(f)).collect())
			}
			Selector::Or(items) => Selector::Or(items.iter().map(|s| s.map_up_fields(f)).collect()),
			Selector::Nor(items) => {
				Selector::Nor(items.iter().map(|s| s.map_up_fields(f)).collect())
			}
			Selector::Where(body) => Selector::Where(body.clone()),
		}
	}

	/// Render this selector as a query document
	pub fn bson(&self) -> Bson {
		match self {
			Selector::Doc(fields) => Bson::Doc(
				fields.iter().map(|(path, cond)| (path.to_string(), cond.bson())).collect(),
			),
			Selector::And(items) => {
				Bson::Doc(Document::from(
					map! { "$and" => Bson::Array(items.iter().map(Selector::bson).collect()) },
				))
			}
			Selector::Or(items) => {
				Bson::Doc(Document::from(
					map! { "$or" => Bson::Array(items.iter().map(Selector::bson).collect()) },
				))
			}
			Selector::Nor(items) => {
				Bson::Doc(Document::from(
					map! { "$nor" => Bson::Array(items.iter().map(Selector::bson).collect()) },
				))
			}
			Selector::Where(body) => {
				Bson::Doc(Document::from(map! { "$where" => Bson::from(body.clone()) }))
			}
		}
	}
}

impl Display for Selector {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.bson(), f)
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn a() -> Selector {
		Selector::eq("a", 1)
	}

	fn b() -> Selector {
		Selector::eq("b", 2)
	}

	fn c() -> Selector {
		Selector::where_clause("this.a > this.b")
	}

	#[rstest]
	#[case::two_docs(a().and(b()), Selector::And(vec![a(), b()]))]
	#[case::flatten_left(Selector::And(vec![a(), b()]).and(c()), Selector::And(vec![a(), b(), c()]))]
	#[case::flatten_right(a().and(Selector::And(vec![b(), c()])), Selector::And(vec![a(), b(), c()]))]
	fn and_append(#[case] combined: Selector, #[case] expected: Selector) {
		assert_eq!(combined, expected);
	}

	#[test]
	fn and_is_associative() {
		assert_eq!(a().and(b()).and(c()), a().and(b().and(c())));
	}

	#[test]
	fn where_detection() {
		assert!(!a().has_where());
		assert!(a().and(c()).has_where());
		assert!(a().is_pipelineable());
		assert!(!a().and(c()).is_pipelineable());
		assert!(Selector::Or(vec![a(), b()]).is_pipelineable());
	}

	#[test]
	fn rename_fields() {
		let renamed = a().and(b()).map_up_fields(&|p| FieldPath::from("value").concat(p));
		assert_eq!(renamed, Selector::eq("value.a", 1).and(Selector::eq("value.b", 2)));
	}

	#[test]
	fn render() {
		assert_eq!(a().bson().to_string(), "{ \"a\": { \"$eq\": 1 } }");
		assert_eq!(
			a().and(b()).bson().to_string(),
			"{ \"$and\": [{ \"a\": { \"$eq\": 1 } }, { \"b\": { \"$eq\": 2 } }] }"
		);
	}
}
