use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::field::DocVar;
use crate::expr::reshape::Reshape;
use crate::js::{JsBinOp, JsCore};
use crate::val::{Bson, Document};

/// A value-level expression evaluated against the current document.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Expr {
	/// A reference to the document root or a field within it
	Var(DocVar),
	/// A literal value
	Literal(Bson),
	Add(Box<Expr>, Box<Expr>),
	Subtract(Box<Expr>, Box<Expr>),
	Multiply(Box<Expr>, Box<Expr>),
	Divide(Box<Expr>, Box<Expr>),
	Concat(Vec<Expr>),
	Eq(Box<Expr>, Box<Expr>),
	Lt(Box<Expr>, Box<Expr>),
	Lte(Box<Expr>, Box<Expr>),
	Gt(Box<Expr>, Box<Expr>),
	Gte(Box<Expr>, Box<Expr>),
	/// A conditional: if the first operand is true, the second, else the third
	Cond(Box<Expr>, Box<Expr>, Box<Expr>),
	/// The first operand unless it is null, else the second
	IfNull(Box<Expr>, Box<Expr>),
	/// Three-way comparison of two operands
	Cmp(Box<Expr>, Box<Expr>),
}

impl Expr {
	/// A field reference expression
	pub fn field(path: impl Into<crate::expr::field::FieldPath>) -> Expr {
		Expr::Var(DocVar::field(path))
	}

	/// Apply `f`, bottom-up, to every document variable in this expression
	pub fn map_up(&self, f: &impl Fn(&DocVar) -> DocVar) -> Expr {
		let recurse = |e: &Expr| e.map_up(f);
		match self {
			Expr::Var(v) => Expr::Var(f(v)),
			Expr::Literal(v) => Expr::Literal(v.clone()),
			Expr::Add(a, b) => Expr::Add(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Subtract(a, b) => Expr::Subtract(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Multiply(a, b) => Expr::Multiply(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Divide(a, b) => Expr::Divide(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Concat(items) => Expr::Concat(items.iter().map(recurse).collect()),
			Expr::Eq(a, b) => Expr::Eq(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Lt(a, b) => Expr::Lt(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Lte(a, b) => Expr::Lte(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Gt(a, b) => Expr::Gt(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Gte(a, b) => Expr::Gte(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Cond(c, t, e) => {
				Expr::Cond(Box::new(recurse(c)), Box::new(recurse(t)), Box::new(recurse(e)))
			}
			Expr::IfNull(a, b) => Expr::IfNull(Box::new(recurse(a)), Box::new(recurse(b))),
			Expr::Cmp(a, b) => Expr::Cmp(Box::new(recurse(a)), Box::new(recurse(b))),
		}
	}

	/// Visit every document variable in this expression
	pub fn each_var(&self, f: &mut impl FnMut(&DocVar)) {
		match self {
			Expr::Var(v) => f(v),
			Expr::Literal(_) => (),
			Expr::Add(a, b)
			| Expr::Subtract(a, b)
			| Expr::Multiply(a, b)
			| Expr::Divide(a, b)
			| Expr::Eq(a, b)
			| Expr::Lt(a, b)
			| Expr::Lte(a, b)
			| Expr::Gt(a, b)
			| Expr::Gte(a, b)
			| Expr::IfNull(a, b)
			| Expr::Cmp(a, b) => {
				a.each_var(f);
				b.each_var(f);
			}
			Expr::Concat(items) => {
				for item in items {
					item.each_var(f);
				}
			}
			Expr::Cond(c, t, e) => {
				c.each_var(f);
				t.each_var(f);
				e.each_var(f);
			}
		}
	}

	/// Replace every variable with an expression, failing if any variable has
	/// no replacement. Used to inline one projection into another.
	pub(crate) fn substitute(&self, f: &impl Fn(&DocVar) -> Option<Expr>) -> Option<Expr> {
		let recurse = |e: &Expr| e.substitute(f);
		let pair = |a: &Expr, b: &Expr| Some((Box::new(recurse(a)?), Box::new(recurse(b)?)));
		Some(match self {
			Expr::Var(v) => f(v)?,
			Expr::Literal(v) => Expr::Literal(v.clone()),
			Expr::Add(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Add(a, b)
			}
			Expr::Subtract(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Subtract(a, b)
			}
			Expr::Multiply(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Multiply(a, b)
			}
			Expr::Divide(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Divide(a, b)
			}
			Expr::Concat(items) => {
				Expr::Concat(items.iter().map(recurse).collect::<Option<Vec<_>>>()?)
			}
			Expr::Eq(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Eq(a, b)
			}
			Expr::Lt(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Lt(a, b)
			}
			Expr::Lte(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Lte(a, b)
			}
			Expr::Gt(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Gt(a, b)
			}
			Expr::Gte(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Gte(a, b)
			}
			Expr::Cond(c, t, e) => {
				Expr::Cond(Box::new(recurse(c)?), Box::new(recurse(t)?), Box::new(recurse(e)?))
			}
			Expr::IfNull(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::IfNull(a, b)
			}
			Expr::Cmp(a, b) => {
				let (a, b) = pair(a, b)?;
				Expr::Cmp(a, b)
			}
		})
	}

	/// Render this expression as an aggregation expression value
	pub fn bson(&self) -> Bson {
		let operands = |name: &str, items: Vec<Bson>| {
			Bson::Doc(Document::from(map! { name.to_string() => Bson::Array(items) }))
		};
		match self {
			Expr::Var(v) => Bson::from(v.to_string()),
			Expr::Literal(v) => Bson::Doc(Document::from(map! { "$literal" => v.clone() })),
			Expr::Add(a, b) => operands("$add", vec![a.bson(), b.bson()]),
			Expr::Subtract(a, b) => operands("$subtract", vec![a.bson(), b.bson()]),
			Expr::Multiply(a, b) => operands("$multiply", vec![a.bson(), b.bson()]),
			Expr::Divide(a, b) => operands("$divide", vec![a.bson(), b.bson()]),
			Expr::Concat(items) => operands("$concat", items.iter().map(Expr::bson).collect()),
			Expr::Eq(a, b) => operands("$eq", vec![a.bson(), b.bson()]),
			Expr::Lt(a, b) => operands("$lt", vec![a.bson(), b.bson()]),
			Expr::Lte(a, b) => operands("$lte", vec![a.bson(), b.bson()]),
			Expr::Gt(a, b) => operands("$gt", vec![a.bson(), b.bson()]),
			Expr::Gte(a, b) => operands("$gte", vec![a.bson(), b.bson()]),
			Expr::Cond(c, t, e) => operands("$cond", vec![c.bson(), t.bson(), e.bson()]),
			Expr::IfNull(a, b) => operands("$ifNull", vec![a.bson(), b.bson()]),
			Expr::Cmp(a, b) => operands("$cmp", vec![a.bson(), b.bson()]),
		}
	}

	/// Translate this expression to a script expression over the variable
	/// named `ident`, if a translation exists.
	pub fn to_js(&self, ident: &str) -> Option<JsCore> {
		let binary = |op: JsBinOp, a: &Expr, b: &Expr| {
			Some(JsCore::Binary(op, Box::new(a.to_js(ident)?), Box::new(b.to_js(ident)?)))
		};
		match self {
			Expr::Var(DocVar::Root) => Some(JsCore::Ident(ident.to_string())),
			Expr::Var(DocVar::Field(path)) => {
				Some(JsCore::access(JsCore::Ident(ident.to_string()), path))
			}
			Expr::Literal(v) => Some(JsCore::Literal(v.clone())),
			Expr::Add(a, b) => binary(JsBinOp::Add, a, b),
			Expr::Subtract(a, b) => binary(JsBinOp::Sub, a, b),
			Expr::Multiply(a, b) => binary(JsBinOp::Mul, a, b),
			Expr::Divide(a, b) => binary(JsBinOp::Div, a, b),
			Expr::Concat(items) => {
				let mut exprs = items.iter().map(|e| e.to_js(ident));
				let first = exprs.next()??;
				exprs.try_fold(first, |acc, e| {
					Some(JsCore::Binary(JsBinOp::Add, Box::new(acc), Box::new(e?)))
				})
			}
			Expr::Eq(a, b) => binary(JsBinOp::Eq, a, b),
			Expr::Lt(a, b) => binary(JsBinOp::Lt, a, b),
			Expr::Lte(a, b) => binary(JsBinOp::Lte, a, b),
			Expr::Gt(a, b) => binary(JsBinOp::Gt, a, b),
			Expr::Gte(a, b) => binary(JsBinOp::Gte, a, b),
			Expr::Cond(c, t, e) => Some(JsCore::Ternary(
				Box::new(c.to_js(ident)?),
				Box::new(t.to_js(ident)?),
				Box::new(e.to_js(ident)?),
			)),
			Expr::IfNull(a, b) => {
				let test = JsCore::Binary(
					JsBinOp::Neq,
					Box::new(a.to_js(ident)?),
					Box::new(JsCore::Literal(Bson::Null)),
				);
				Some(JsCore::Ternary(
					Box::new(test),
					Box::new(a.to_js(ident)?),
					Box::new(b.to_js(ident)?),
				))
			}
			// The scripting sublanguage has no three-way comparison
			Expr::Cmp(..) => None,
		}
	}
}

impl Display for Expr {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.bson(), f)
	}
}

/// A grouping accumulator: the closed subset of operators legal as the value
/// of a group output field. A rewrite maps over the inner expression, so an
/// accumulator stays an accumulator under any reference rewrite.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Accumulator {
	Sum(Expr),
	Avg(Expr),
	Min(Expr),
	Max(Expr),
	First(Expr),
	Last(Expr),
	Push(Expr),
	AddToSet(Expr),
}

impl Accumulator {
	/// The accumulated expression
	pub fn expr(&self) -> &Expr {
		match self {
			Accumulator::Sum(e)
			| Accumulator::Avg(e)
			| Accumulator::Min(e)
			| Accumulator::Max(e)
			| Accumulator::First(e)
			| Accumulator::Last(e)
			| Accumulator::Push(e)
			| Accumulator::AddToSet(e) => e,
		}
	}

	/// Rebuild this accumulator around a transformed expression
	pub fn map_expr(&self, f: &impl Fn(&Expr) -> Expr) -> Accumulator {
		match self {
			Accumulator::Sum(e) => Accumulator::Sum(f(e)),
			Accumulator::Avg(e) => Accumulator::Avg(f(e)),
			Accumulator::Min(e) => Accumulator::Min(f(e)),
			Accumulator::Max(e) => Accumulator::Max(f(e)),
			Accumulator::First(e) => Accumulator::First(f(e)),
			Accumulator::Last(e) => Accumulator::Last(f(e)),
			Accumulator::Push(e) => Accumulator::Push(f(e)),
			Accumulator::AddToSet(e) => Accumulator::AddToSet(f(e)),
		}
	}

	/// Rebuild this accumulator around a fallibly transformed expression
	pub(crate) fn try_map_expr(&self, f: &impl Fn(&Expr) -> Option<Expr>) -> Option<Accumulator> {
		let expr = f(self.expr())?;
		Some(self.map_expr(&|_| expr.clone()))
	}

	/// Apply `f` to every document variable in the accumulated expression
	pub fn map_up(&self, f: &impl Fn(&DocVar) -> DocVar) -> Accumulator {
		self.map_expr(&|e| e.map_up(f))
	}

	/// Render this accumulator as its operator document
	pub fn bson(&self) -> Bson {
		let (op, expr) = match self {
			Accumulator::Sum(e) => ("$sum", e),
			Accumulator::Avg(e) => ("$avg", e),
			Accumulator::Min(e) => ("$min", e),
			Accumulator::Max(e) => ("$max", e),
			Accumulator::First(e) => ("$first", e),
			Accumulator::Last(e) => ("$last", e),
			Accumulator::Push(e) => ("$push", e),
			Accumulator::AddToSet(e) => ("$addToSet", e),
		};
		Bson::Doc(Document::from(map! { op => expr.bson() }))
	}
}

/// The output fields of a group: a mapping from field name to accumulator.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Grouped(pub BTreeMap<String, Accumulator>);

impl Grouped {
	/// Union two grouped maps; entries of `other` win on a shared name
	pub fn union(&self, other: &Grouped) -> Grouped {
		let mut merged = self.0.clone();
		merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
		Grouped(merged)
	}

	/// Apply `f` to every document variable in every accumulator
	pub fn map_up(&self, f: &impl Fn(&DocVar) -> DocVar) -> Grouped {
		Grouped(self.0.iter().map(|(k, acc)| (k.clone(), acc.map_up(f))).collect())
	}

	/// Visit every document variable in every accumulator
	pub fn each_var(&self, f: &mut impl FnMut(&DocVar)) {
		for acc in self.0.values() {
			acc.expr().each_var(f);
		}
	}

	/// Render the grouped fields as a document
	pub fn bson(&self) -> Bson {
		Bson::Doc(self.0.iter().map(|(k, acc)| (k.clone(), acc.bson())).collect())
	}
}

impl From<BTreeMap<String, Accumulator>> for Grouped {
	fn from(v: BTreeMap<String, Accumulator>) -> Self {
		Grouped(v)
	}
}

impl From<BTreeMap<&str, Accumulator>> for Grouped {
	fn from(v: BTreeMap<&str, Accumulator>) -> Self {
		Grouped(v.into_iter().map(|(k, acc)| (k.to_string(), acc)).collect())
	}
}

/// The key of a group: a single expression or a reshaping document.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum GroupBy {
	Expr(Expr),
	Shape(Reshape),
}

impl GroupBy {
	/// Apply `f` to every document variable in the key
	pub fn map_up(&self, f: &impl Fn(&DocVar) -> DocVar) -> GroupBy {
		match self {
			GroupBy::Expr(e) => GroupBy::Expr(e.map_up(f)),
			GroupBy::Shape(r) => GroupBy::Shape(r.map_up(f)),
		}
	}

	/// Visit every document variable in the key
	pub fn each_var(&self, f: &mut impl FnMut(&DocVar)) {
		match self {
			GroupBy::Expr(e) => e.each_var(f),
			GroupBy::Shape(r) => r.each_var(f),
		}
	}

	/// Render the key as the `_id` value of a group document
	pub fn bson(&self) -> Bson {
		match self {
			GroupBy::Expr(e) => e.bson(),
			GroupBy::Shape(r) => r.bson(),
		}
	}
}
