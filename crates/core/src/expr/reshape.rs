use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::expression::Expr;
use crate::expr::field::{DocVar, FieldPath};
use crate::js::JsCore;
use crate::val::Bson;

/// One field of a reshape: a computed expression or a nested reshape.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum ShapeField {
	Expr(Expr),
	Shape(Reshape),
}

impl ShapeField {
	/// The expression, unless this field nests a reshape
	pub fn as_expr(&self) -> Option<&Expr> {
		match self {
			ShapeField::Expr(e) => Some(e),
			ShapeField::Shape(_) => None,
		}
	}
}

/// A projection shape: a document of computed fields, possibly nested.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Reshape(pub BTreeMap<String, ShapeField>);

impl Reshape {
	/// A shape with a single computed field
	pub fn field(name: impl Into<String>, expr: Expr) -> Reshape {
		Reshape(map! { name.into() => ShapeField::Expr(expr) })
	}

	/// Look up the field at `path`, descending through nested shapes
	pub fn get(&self, path: &FieldPath) -> Option<&ShapeField> {
		let (head, rest) = match path.segments() {
			[head, rest @ ..] => (head, rest),
			[] => return None,
		};
		let field = self.0.get(head)?;
		if rest.is_empty() {
			Some(field)
		} else {
			match field {
				ShapeField::Shape(inner) => {
					let rest = FieldPath::from(rest.join(".").as_str());
					inner.get(&rest)
				}
				ShapeField::Expr(_) => None,
			}
		}
	}

	/// Set the field at `path`, creating intermediate shapes as needed
	pub fn set(&self, path: &FieldPath, value: ShapeField) -> Reshape {
		let (head, rest) = match path.segments() {
			[head, rest @ ..] => (head.clone(), rest),
			[] => return self.clone(),
		};
		let mut fields = self.0.clone();
		if rest.is_empty() {
			fields.insert(head, value);
		} else {
			let rest = FieldPath::from(rest.join(".").as_str());
			let inner = match fields.get(&head) {
				Some(ShapeField::Shape(inner)) => inner.clone(),
				_ => Reshape::default(),
			};
			fields.insert(head, ShapeField::Shape(inner.set(&rest, value)));
		}
		Reshape(fields)
	}

	/// All leaf expressions, paired with their full paths
	pub fn get_all(&self) -> Vec<(FieldPath, Expr)> {
		let mut leaves = Vec::new();
		for (name, field) in &self.0 {
			let path = FieldPath::field(name.clone());
			match field {
				ShapeField::Expr(e) => leaves.push((path, e.clone())),
				ShapeField::Shape(inner) => {
					for (sub, e) in inner.get_all() {
						leaves.push((path.concat(&sub), e));
					}
				}
			}
		}
		leaves
	}

	/// Build a shape from a list of leaf expressions
	pub fn set_all(leaves: impl IntoIterator<Item = (FieldPath, Expr)>) -> Reshape {
		leaves
			.into_iter()
			.fold(Reshape::default(), |shape, (path, e)| shape.set(&path, ShapeField::Expr(e)))
	}

	/// Merge two shapes field by field.
	///
	/// Returns `None` when the shapes collide: a leaf against a nested shape,
	/// or two different expressions for the same leaf. Identical leaves merge.
	pub fn merge(&self, other: &Reshape) -> Option<Reshape> {
		let mut fields = self.0.clone();
		for (name, right) in &other.0 {
			match fields.get(name) {
				None => {
					fields.insert(name.clone(), right.clone());
				}
				Some(left) => match (left, right) {
					(ShapeField::Shape(l), ShapeField::Shape(r)) => {
						fields.insert(name.clone(), ShapeField::Shape(l.merge(r)?));
					}
					(ShapeField::Expr(l), ShapeField::Expr(r)) if l == r => (),
					_ => return None,
				},
			}
		}
		Some(Reshape(fields))
	}

	/// Apply `f` to every document variable in every leaf expression
	pub fn map_up(&self, f: &impl Fn(&DocVar) -> DocVar) -> Reshape {
		Reshape(
			self.0
				.iter()
				.map(|(name, field)| {
					let field = match field {
						ShapeField::Expr(e) => ShapeField::Expr(e.map_up(f)),
						ShapeField::Shape(inner) => ShapeField::Shape(inner.map_up(f)),
					};
					(name.clone(), field)
				})
				.collect(),
		)
	}

	/// Visit every document variable in every leaf expression
	pub fn each_var(&self, f: &mut impl FnMut(&DocVar)) {
		for field in self.0.values() {
			match field {
				ShapeField::Expr(e) => e.each_var(f),
				ShapeField::Shape(inner) => inner.each_var(f),
			}
		}
	}

	/// Replace every leaf variable via `f`, failing if any has no replacement
	pub(crate) fn substitute(&self, f: &impl Fn(&DocVar) -> Option<Expr>) -> Option<Reshape> {
		let mut fields = BTreeMap::new();
		for (name, field) in &self.0 {
			let field = match field {
				ShapeField::Expr(e) => ShapeField::Expr(e.substitute(f)?),
				ShapeField::Shape(inner) => ShapeField::Shape(inner.substitute(f)?),
			};
			fields.insert(name.clone(), field);
		}
		Some(Reshape(fields))
	}

	/// Render this shape as a projection document
	pub fn bson(&self) -> Bson {
		Bson::Doc(
			self.0
				.iter()
				.map(|(name, field)| {
					let value = match field {
						ShapeField::Expr(e) => e.bson(),
						ShapeField::Shape(inner) => inner.bson(),
					};
					(name.clone(), value)
				})
				.collect(),
		)
	}

	/// Translate this shape to a script object literal over the variable
	/// named `ident`, if every leaf expression has a translation.
	pub fn to_js(&self, ident: &str) -> Option<JsCore> {
		let mut entries = Vec::with_capacity(self.0.len());
		for (name, field) in &self.0 {
			let value = match field {
				ShapeField::Expr(e) => e.to_js(ident)?,
				ShapeField::Shape(inner) => inner.to_js(ident)?,
			};
			entries.push((name.clone(), value));
		}
		Some(JsCore::Obj(entries))
	}
}

impl From<BTreeMap<String, ShapeField>> for Reshape {
	fn from(v: BTreeMap<String, ShapeField>) -> Self {
		Reshape(v)
	}
}

impl From<BTreeMap<&str, ShapeField>> for Reshape {
	fn from(v: BTreeMap<&str, ShapeField>) -> Self {
		Reshape(v.into_iter().map(|(k, f)| (k.to_string(), f)).collect())
	}
}

impl Display for Reshape {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.bson(), f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Reshape {
		Reshape::from(map! {
			"a" => ShapeField::Expr(Expr::field("x")),
			"b" => ShapeField::Shape(Reshape::field("c", Expr::field("y.z"))),
		})
	}

	#[test]
	fn get_descends_nested_shapes() {
		let shape = sample();
		assert_eq!(shape.get(&FieldPath::from("a")), Some(&ShapeField::Expr(Expr::field("x"))));
		assert_eq!(
			shape.get(&FieldPath::from("b.c")),
			Some(&ShapeField::Expr(Expr::field("y.z")))
		);
		assert_eq!(shape.get(&FieldPath::from("a.b")), None);
		assert_eq!(shape.get(&FieldPath::from("missing")), None);
	}

	#[test]
	fn set_creates_intermediates() {
		let shape = Reshape::default().set(
			&FieldPath::from("a.b.c"),
			ShapeField::Expr(Expr::Literal(Bson::Int(1))),
		);
		assert_eq!(
			shape.get(&FieldPath::from("a.b.c")),
			Some(&ShapeField::Expr(Expr::Literal(Bson::Int(1))))
		);
	}

	#[test]
	fn get_all_round_trips_through_set_all() {
		let shape = sample();
		assert_eq!(Reshape::set_all(shape.get_all()), shape);
	}

	#[test]
	fn merge_disjoint() {
		let left = Reshape::field("a", Expr::field("x"));
		let right = Reshape::field("b", Expr::field("y"));
		let merged = left.merge(&right).unwrap();
		assert_eq!(merged.0.len(), 2);
	}

	#[test]
	fn merge_conflicting_leaf() {
		let left = Reshape::field("a", Expr::field("x"));
		let right = Reshape::field("a", Expr::field("y"));
		assert_eq!(left.merge(&right), None);
		// An identical leaf is not a conflict
		assert_eq!(left.merge(&left.clone()), Some(left));
	}

	#[test]
	fn merge_leaf_against_shape() {
		let left = Reshape::field("a", Expr::field("x"));
		let right = Reshape::from(map! {
			"a" => ShapeField::Shape(Reshape::field("b", Expr::field("y"))),
		});
		assert_eq!(left.merge(&right), None);
	}

	#[test]
	fn to_js_requires_all_leaves() {
		let shape = sample();
		let js = shape.to_js("value").unwrap();
		assert_eq!(js.to_string(), "{ a: value.x, b: { c: value.y.z } }");
	}
}
