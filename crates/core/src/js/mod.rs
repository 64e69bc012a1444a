//! The embedded scripting sublanguage used by map-reduce operators: a small
//! expression and statement tree with a renderer, plus the constructor
//! helpers the compiler needs to fuse and adapt script functions. The tree
//! is plain data with structural equality, so fusion laws hold up to
//! equality of the composed functions.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::FieldPath;
use crate::fmt::{Fmt, QuoteStr};
use crate::val::Bson;

/// A binary operator in a script expression.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum JsBinOp {
	Add,
	Sub,
	Mul,
	Div,
	Eq,
	Neq,
	Lt,
	Lte,
	Gt,
	Gte,
	And,
	Or,
}

impl JsBinOp {
	fn symbol(&self) -> &'static str {
		match self {
			JsBinOp::Add => "+",
			JsBinOp::Sub => "-",
			JsBinOp::Mul => "*",
			JsBinOp::Div => "/",
			JsBinOp::Eq => "===",
			JsBinOp::Neq => "!==",
			JsBinOp::Lt => "<",
			JsBinOp::Lte => "<=",
			JsBinOp::Gt => ">",
			JsBinOp::Gte => ">=",
			JsBinOp::And => "&&",
			JsBinOp::Or => "||",
		}
	}
}

/// A script expression.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum JsCore {
	Ident(String),
	Literal(Bson),
	/// Property access, `x.y`
	Access(Box<JsCore>, String),
	/// Computed access, `x[i]`
	Index(Box<JsCore>, Box<JsCore>),
	Call(Box<JsCore>, Vec<JsCore>),
	Binary(JsBinOp, Box<JsCore>, Box<JsCore>),
	Ternary(Box<JsCore>, Box<JsCore>, Box<JsCore>),
	Arr(Vec<JsCore>),
	Obj(Vec<(String, JsCore)>),
	Fun(Box<JsFn>),
}

impl JsCore {
	/// Chain property accesses for every segment of a field path
	pub fn access(base: JsCore, path: &FieldPath) -> JsCore {
		path.segments()
			.iter()
			.fold(base, |acc, segment| JsCore::Access(Box::new(acc), segment.clone()))
	}
}

fn is_ident(name: &str) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => (),
		_ => return false,
	}
	chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl Display for JsCore {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			JsCore::Ident(name) => f.write_str(name),
			JsCore::Literal(v) => Display::fmt(v, f),
			JsCore::Access(base, name) => {
				if is_ident(name) {
					write!(f, "{base}.{name}")
				} else {
					write!(f, "{base}[{}]", QuoteStr(name))
				}
			}
			JsCore::Index(base, index) => write!(f, "{base}[{index}]"),
			JsCore::Call(target, args) => {
				write!(f, "{target}({})", Fmt::comma_separated(args.iter()))
			}
			JsCore::Binary(op, a, b) => write!(f, "({a} {} {b})", op.symbol()),
			JsCore::Ternary(c, t, e) => write!(f, "({c} ? {t} : {e})"),
			JsCore::Arr(items) => write!(f, "[{}]", Fmt::comma_separated(items.iter())),
			JsCore::Obj(entries) => {
				if entries.is_empty() {
					return f.write_str("{}");
				}
				write!(
					f,
					"{{ {} }}",
					Fmt::comma_separated(entries.iter().map(|(name, value)| {
						if is_ident(name) {
							format!("{name}: {value}")
						} else {
							format!("{}: {value}", QuoteStr(name))
						}
					}))
				)
			}
			JsCore::Fun(fun) => write!(f, "({fun})"),
		}
	}
}

/// A script statement.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum JsStmt {
	Var(String, Option<JsCore>),
	Expr(JsCore),
	Assign(JsCore, JsCore),
	Return(JsCore),
	ForIn(String, JsCore, Vec<JsStmt>),
}

impl Display for JsStmt {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			JsStmt::Var(name, None) => write!(f, "var {name};"),
			JsStmt::Var(name, Some(value)) => write!(f, "var {name} = {value};"),
			JsStmt::Expr(e) => write!(f, "{e};"),
			JsStmt::Assign(target, value) => write!(f, "{target} = {value};"),
			JsStmt::Return(e) => write!(f, "return {e};"),
			JsStmt::ForIn(name, source, body) => {
				write!(f, "for (var {name} in {source}) {{")?;
				for stmt in body {
					write!(f, " {stmt}")?;
				}
				f.write_str(" }")
			}
		}
	}
}

/// An anonymous script function.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct JsFn {
	pub params: Vec<String>,
	pub body: Vec<JsStmt>,
}

impl JsFn {
	/// A function of `params` returning a single expression
	pub fn returning(params: &[&str], expr: JsCore) -> JsFn {
		JsFn {
			params: params.iter().map(|p| p.to_string()).collect(),
			body: vec![JsStmt::Return(expr)],
		}
	}

	/// This function as a call target expression
	fn expr(&self) -> JsCore {
		JsCore::Fun(Box::new(self.clone()))
	}
}

impl Display for JsFn {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "function ({}) {{", Fmt::comma_separated(self.params.iter()))?;
		for stmt in &self.body {
			write!(f, " {stmt}")?;
		}
		f.write_str(" }")
	}
}

fn key() -> JsCore {
	JsCore::Ident("key".to_string())
}

fn value() -> JsCore {
	JsCore::Ident("value".to_string())
}

fn null() -> JsCore {
	JsCore::Literal(Bson::Null)
}

/// The identity map function, `(key, value)` to `[key, value]`.
pub fn identity() -> JsFn {
	JsFn::returning(&["key", "value"], JsCore::Arr(vec![key(), value()]))
}

/// A map function projecting the field at `var` out of each value.
pub fn select(var: &crate::expr::DocVar) -> JsFn {
	match var.path() {
		None => identity(),
		Some(path) => JsFn::returning(
			&["key", "value"],
			JsCore::Arr(vec![key(), JsCore::access(value(), path)]),
		),
	}
}

/// A map function binding the value to `ident` and returning `[key, expr]`.
pub fn map_map(ident: &str, expr: JsCore) -> JsFn {
	JsFn::returning(&["key", ident], JsCore::Arr(vec![key(), expr]))
}

/// Compose two pair-returning map functions, `g` after `f`.
pub fn compose(g: &JsFn, f: &JsFn) -> JsFn {
	JsFn::returning(
		&["key", "value"],
		JsCore::Call(
			Box::new(JsCore::Access(Box::new(g.expr()), "apply".to_string())),
			vec![null(), JsCore::Call(Box::new(f.expr()), vec![key(), value()])],
		),
	)
}

/// Compose a map function `g` after a flat-map function `f`, producing a
/// flat-map function: each pair yielded by `f` is passed through `g`.
pub fn map_compose(g: &JsFn, f: &JsFn) -> JsFn {
	JsFn::returning(&["key", "value"], map_pairs(g, f))
}

/// Kleisli-compose two flat-map functions: every pair yielded by `f` is fed
/// to `g`, and the lists of pairs are concatenated.
pub fn kleisli(g: &JsFn, f: &JsFn) -> JsFn {
	JsFn::returning(
		&["key", "value"],
		JsCore::Call(
			Box::new(JsCore::Access(
				Box::new(JsCore::Access(Box::new(JsCore::Arr(vec![])), "concat".to_string())),
				"apply".to_string(),
			)),
			vec![JsCore::Arr(vec![]), map_pairs(g, f)],
		),
	)
}

fn map_pairs(g: &JsFn, f: &JsFn) -> JsCore {
	let apply_g = JsFn::returning(
		&["pair"],
		JsCore::Call(
			Box::new(JsCore::Access(Box::new(g.expr()), "apply".to_string())),
			vec![null(), JsCore::Ident("pair".to_string())],
		),
	);
	JsCore::Call(
		Box::new(JsCore::Access(
			Box::new(JsCore::Call(Box::new(f.expr()), vec![key(), value()])),
			"map".to_string(),
		)),
		vec![apply_g.expr()],
	)
}

/// Adapt a pair-returning map function into a finalizer, which returns the
/// new value only.
pub fn finalizer_fn(f: &JsFn) -> JsFn {
	JsFn::returning(
		&["key", "value"],
		JsCore::Index(
			Box::new(JsCore::Call(Box::new(f.expr()), vec![key(), value()])),
			Box::new(JsCore::Literal(Bson::Int(1))),
		),
	)
}

/// The reduce function that keeps the first value of each key unchanged.
pub fn nop_reduce() -> JsFn {
	JsFn::returning(
		&["key", "values"],
		JsCore::Index(
			Box::new(JsCore::Ident("values".to_string())),
			Box::new(JsCore::Literal(Bson::Int(0))),
		),
	)
}

/// The reduce function for fold arms: merges the fields of every reduced
/// document into one, later arms winning on shared names.
pub fn fold_left_reduce() -> JsFn {
	let result = JsCore::Ident("result".to_string());
	let field = JsCore::Ident("field".to_string());
	let merge_one = JsFn {
		params: vec!["value".to_string()],
		body: vec![JsStmt::ForIn(
			"field".to_string(),
			value(),
			vec![JsStmt::Assign(
				JsCore::Index(Box::new(result.clone()), Box::new(field.clone())),
				JsCore::Index(Box::new(value()), Box::new(field)),
			)],
		)],
	};
	JsFn {
		params: vec!["key".to_string(), "values".to_string()],
		body: vec![
			JsStmt::Var("result".to_string(), Some(JsCore::Obj(vec![]))),
			JsStmt::Expr(JsCore::Call(
				Box::new(JsCore::Access(
					Box::new(JsCore::Ident("values".to_string())),
					"forEach".to_string(),
				)),
				vec![merge_one.expr()],
			)),
			JsStmt::Return(result),
		],
	}
}

/// The flat-map function replacing an unwind: yields one copy of the value
/// per element of the array at `path`, with the array replaced by the
/// element.
pub fn unwind_op(path: &FieldPath) -> JsFn {
	let copy = JsCore::Ident("copy".to_string());
	let field = JsCore::Ident("field".to_string());
	let each = JsFn {
		params: vec!["item".to_string()],
		body: vec![
			JsStmt::Var("copy".to_string(), Some(JsCore::Obj(vec![]))),
			JsStmt::ForIn(
				"field".to_string(),
				value(),
				vec![JsStmt::Assign(
					JsCore::Index(Box::new(copy.clone()), Box::new(field.clone())),
					JsCore::Index(Box::new(value()), Box::new(field)),
				)],
			),
			JsStmt::Assign(JsCore::access(copy.clone(), path), JsCore::Ident("item".to_string())),
			JsStmt::Return(JsCore::Arr(vec![key(), copy])),
		],
	};
	JsFn::returning(
		&["key", "value"],
		JsCore::Call(
			Box::new(JsCore::Access(
				Box::new(JsCore::Binary(
					JsBinOp::Or,
					Box::new(JsCore::access(value(), path)),
					Box::new(JsCore::Arr(vec![])),
				)),
				"map".to_string(),
			)),
			vec![each.expr()],
		),
	)
}
