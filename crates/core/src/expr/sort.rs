use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::field::FieldPath;
use crate::val::Bson;

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum SortDirection {
	#[default]
	Ascending,
	Descending,
}

impl SortDirection {
	/// Render this direction as its numeric form
	pub fn bson(&self) -> Bson {
		match self {
			SortDirection::Ascending => Bson::Int(1),
			SortDirection::Descending => Bson::Int(-1),
		}
	}
}

/// A single sort key. Sort stages carry a list of these; the list order is
/// significant and the list is never empty.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SortKey {
	pub field: FieldPath,
	pub direction: SortDirection,
}

impl SortKey {
	/// An ascending key
	pub fn asc(field: impl Into<FieldPath>) -> SortKey {
		SortKey {
			field: field.into(),
			direction: SortDirection::Ascending,
		}
	}

	/// A descending key
	pub fn desc(field: impl Into<FieldPath>) -> SortKey {
		SortKey {
			field: field.into(),
			direction: SortDirection::Descending,
		}
	}
}

/// Render a key list as a sort document
pub fn sort_bson(keys: &[SortKey]) -> Bson {
	Bson::Doc(keys.iter().map(|k| (k.field.to_string(), k.direction.bson())).collect())
}

impl Display for SortKey {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "{}: {}", self.field, self.direction.bson())
	}
}
