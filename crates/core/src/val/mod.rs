use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::fmt::{Fmt, QuoteStr};

/// An ordered document of named values.
///
/// Invariant: keys never contain NUL bytes.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Document(pub BTreeMap<String, Bson>);

impl Document {
	/// Create an empty document
	pub fn new() -> Self {
		Self::default()
	}
}

impl From<BTreeMap<String, Bson>> for Document {
	fn from(v: BTreeMap<String, Bson>) -> Self {
		Self(v)
	}
}

impl From<BTreeMap<&str, Bson>> for Document {
	fn from(v: BTreeMap<&str, Bson>) -> Self {
		Self(v.into_iter().map(|(key, val)| (key.to_string(), val)).collect())
	}
}

impl FromIterator<(String, Bson)> for Document {
	fn from_iter<T: IntoIterator<Item = (String, Bson)>>(iter: T) -> Self {
		Self(BTreeMap::from_iter(iter))
	}
}

impl Deref for Document {
	type Target = BTreeMap<String, Bson>;
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for Document {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

impl IntoIterator for Document {
	type Item = (String, Bson);
	type IntoIter = std::collections::btree_map::IntoIter<String, Bson>;
	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl Display for Document {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(
			f,
			"{{ {} }}",
			Fmt::comma_separated(self.0.iter().map(|(k, v)| format!("{}: {}", QuoteStr(k), v)))
		)
	}
}

/// A single value in the document data model.
#[derive(Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Bson {
	#[default]
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Array(Vec<Bson>),
	Doc(Document),
}

impl Eq for Bson {}

impl Ord for Bson {
	fn cmp(&self, other: &Self) -> Ordering {
		self.partial_cmp(other).unwrap_or(Ordering::Equal)
	}
}

impl Bson {
	/// Create an empty document value
	pub fn empty_doc() -> Self {
		Bson::Doc(Document::default())
	}

	/// Check if this value is NULL
	pub fn is_null(&self) -> bool {
		matches!(self, Bson::Null)
	}

	/// Access this value as a document
	pub fn as_doc(&self) -> Option<&Document> {
		match self {
			Bson::Doc(doc) => Some(doc),
			_ => None,
		}
	}
}

impl From<bool> for Bson {
	fn from(v: bool) -> Self {
		Bson::Bool(v)
	}
}

impl From<i64> for Bson {
	fn from(v: i64) -> Self {
		Bson::Int(v)
	}
}

impl From<i32> for Bson {
	fn from(v: i32) -> Self {
		Bson::Int(v as i64)
	}
}

impl From<f64> for Bson {
	fn from(v: f64) -> Self {
		Bson::Float(v)
	}
}

impl From<&str> for Bson {
	fn from(v: &str) -> Self {
		Bson::String(v.to_string())
	}
}

impl From<String> for Bson {
	fn from(v: String) -> Self {
		Bson::String(v)
	}
}

impl From<Vec<Bson>> for Bson {
	fn from(v: Vec<Bson>) -> Self {
		Bson::Array(v)
	}
}

impl From<Document> for Bson {
	fn from(v: Document) -> Self {
		Bson::Doc(v)
	}
}

impl From<BTreeMap<String, Bson>> for Bson {
	fn from(v: BTreeMap<String, Bson>) -> Self {
		Bson::Doc(Document(v))
	}
}

impl Display for Bson {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Bson::Null => f.write_str("null"),
			Bson::Bool(v) => Display::fmt(v, f),
			Bson::Int(v) => Display::fmt(v, f),
			Bson::Float(v) => Display::fmt(v, f),
			Bson::String(v) => Display::fmt(&QuoteStr(v), f),
			Bson::Array(v) => write!(f, "[{}]", Fmt::comma_separated(v.iter())),
			Bson::Doc(v) => Display::fmt(v, f),
		}
	}
}
