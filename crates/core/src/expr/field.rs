use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A dotted path to a field, relative to an enclosing document.
///
/// Invariant: a path always has at least one segment.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
	/// Create a single-segment path
	pub fn field(name: impl Into<String>) -> Self {
		Self(vec![name.into()])
	}

	/// The path segments, in order
	pub fn segments(&self) -> &[String] {
		&self.0
	}

	/// The first segment of the path
	pub fn head(&self) -> &str {
		&self.0[0]
	}

	/// Concatenate two paths, this one first
	pub fn concat(&self, other: &FieldPath) -> FieldPath {
		let mut segments = self.0.clone();
		segments.extend(other.0.iter().cloned());
		FieldPath(segments)
	}

	/// Generate a field name not present in `existing`.
	///
	/// Names are deterministic so that repeated compiles of the same workflow
	/// produce identical trees.
	pub fn gen_uniq_name(existing: &BTreeSet<String>) -> String {
		Self::gen_uniq_names(1, existing).remove(0)
	}

	/// Generate `n` distinct field names, none present in `existing`
	pub fn gen_uniq_names(n: usize, existing: &BTreeSet<String>) -> Vec<String> {
		let mut names = Vec::with_capacity(n);
		let mut index = 0usize;
		while names.len() < n {
			let candidate = format!("__tmp{index}");
			if !existing.contains(&candidate) {
				names.push(candidate);
			}
			index += 1;
		}
		names
	}
}

impl From<&str> for FieldPath {
	/// Parse a dotted path such as `a.b.c`
	fn from(v: &str) -> Self {
		let segments: Vec<String> =
			v.split('.').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect();
		if segments.is_empty() {
			FieldPath(vec![String::new()])
		} else {
			FieldPath(segments)
		}
	}
}

impl From<String> for FieldPath {
	fn from(v: String) -> Self {
		FieldPath::from(v.as_str())
	}
}

impl From<FieldPath> for String {
	fn from(v: FieldPath) -> Self {
		v.to_string()
	}
}

impl Display for FieldPath {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		for (i, segment) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(".")?;
			}
			f.write_str(segment)?;
		}
		Ok(())
	}
}

/// A reference to the current document, or to a field path within it.
///
/// A `DocVar` is how one operator tells another where the logical root of
/// its data lives: `Root` is the document itself, `Field` a path under it.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum DocVar {
	Root,
	Field(FieldPath),
}

impl DocVar {
	/// Create a field reference from anything that parses to a path
	pub fn field(path: impl Into<FieldPath>) -> Self {
		DocVar::Field(path.into())
	}

	/// Concatenate two references; `Root` is the unit on both sides
	pub fn concat(&self, other: &DocVar) -> DocVar {
		match (self, other) {
			(DocVar::Root, v) => v.clone(),
			(v, DocVar::Root) => v.clone(),
			(DocVar::Field(p), DocVar::Field(q)) => DocVar::Field(p.concat(q)),
		}
	}

	/// The field path, unless this is the document root
	pub fn path(&self) -> Option<&FieldPath> {
		match self {
			DocVar::Root => None,
			DocVar::Field(p) => Some(p),
		}
	}

	/// Check if this is the document root
	pub fn is_root(&self) -> bool {
		matches!(self, DocVar::Root)
	}
}

impl Display for DocVar {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			DocVar::Root => f.write_str("$$ROOT"),
			DocVar::Field(p) => write!(f, "${p}"),
		}
	}
}
