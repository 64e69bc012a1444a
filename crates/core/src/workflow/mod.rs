//! The workflow graph: the operator tree a client builds through smart
//! constructors, and the transformations that prepare it for execution.
//!
//! Operators are heterogeneous. Most are pipelineable and run inside an
//! aggregation pipeline; the scripted operators compile to map-reduce jobs;
//! a fold merges several arms into one collection and a join runs sources
//! in parallel. The classification drives every transformation: forbidden
//! combinations are broken up with bridge operators rather than rejected.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::{DocVar, Expr, FieldPath, GroupBy, Grouped, Reshape, Selector, SortKey};
use crate::js::JsFn;
use crate::task::PipelineStage;
use crate::val::Bson;

pub(crate) mod coalesce;
pub(crate) mod fields;
pub(crate) mod finalize;
pub(crate) mod inline;
pub(crate) mod merge;
pub(crate) mod rewrite;

pub use self::fields::{delete_unused_fields, finish};
pub use self::finalize::finalize;
pub use self::merge::{LEFT_NAME, RIGHT_NAME, merge};
pub use self::rewrite::{refs, rewrite_refs};

/// The field name under which every map-reduce job emits its value.
pub const EXPR_NAME: &str = "value";

/// The document variable for the map-reduce output convention.
pub(crate) fn expr_var() -> DocVar {
	DocVar::field(EXPR_NAME)
}

/// A named collection in the target database.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Collection(pub String);

impl From<&str> for Collection {
	fn from(v: &str) -> Self {
		Collection(v.to_string())
	}
}

impl From<String> for Collection {
	fn from(v: String) -> Self {
		Collection(v)
	}
}

impl Display for Collection {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The `_id` discipline of a projection.
///
/// `Ignore` is the unit of both operations: combining or chaining with it
/// changes nothing. A projection with `Exclude` must emit `_id: false` when
/// serialized, regardless of the shape contents.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum IdHandling {
	Ignore,
	Include,
	Exclude,
}

impl IdHandling {
	/// Combine the disciplines of two projections merged at the same node.
	/// `Include` dominates, then `Exclude`; commutative.
	pub fn combine(self, other: IdHandling) -> IdHandling {
		match (self, other) {
			(IdHandling::Include, _) | (_, IdHandling::Include) => IdHandling::Include,
			(IdHandling::Exclude, _) | (_, IdHandling::Exclude) => IdHandling::Exclude,
			(IdHandling::Ignore, IdHandling::Ignore) => IdHandling::Ignore,
		}
	}

	/// Chain the discipline of a projection fed into another. The second
	/// wins unless it ignores the `_id` field.
	pub fn chain(self, other: IdHandling) -> IdHandling {
		match other {
			IdHandling::Ignore => self,
			other => other,
		}
	}
}

/// The parameters of a geo-near stage.
#[derive(Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GeoNearParams {
	pub near: (f64, f64),
	pub distance_field: FieldPath,
	pub limit: Option<i64>,
	pub max_distance: Option<f64>,
	pub query: Option<Selector>,
	pub spherical: bool,
	pub distance_multiplier: Option<f64>,
	pub include_locs: Option<FieldPath>,
	pub unique_docs: bool,
}

impl Eq for GeoNearParams {}

impl Ord for GeoNearParams {
	fn cmp(&self, other: &Self) -> Ordering {
		self.partial_cmp(other).unwrap_or(Ordering::Equal)
	}
}

/// The classification of a workflow operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
	/// No input: a literal or a collection read
	Source,
	/// Pipelineable and keeps the incoming document shape
	ShapePreserving,
	/// Pipelineable but changes the document shape
	ShapeChanging,
	/// A scripted operator, compiled to a map-reduce job
	Js,
	/// Fan-in of several arms into one collection
	FoldLeft,
	/// Parallel combination of independent sources
	Join,
}

/// A single workflow operator and its children.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Op {
	Pure(Bson),
	Read(Collection),
	Match(Workflow, Selector),
	Project(Workflow, Reshape, IdHandling),
	Redact(Workflow, Expr),
	Limit(Workflow, i64),
	Skip(Workflow, i64),
	Unwind(Workflow, DocVar),
	Group(Workflow, Grouped, GroupBy),
	Sort(Workflow, Vec<SortKey>),
	GeoNear(Workflow, GeoNearParams),
	Out(Workflow, Collection),
	Map(Workflow, JsFn),
	FlatMap(Workflow, JsFn),
	Reduce(Workflow, JsFn),
	/// A head arm plus a nonempty tail of arms reduced into it
	FoldLeft(Workflow, Vec<Workflow>),
	Join(BTreeSet<Workflow>),
}

impl Op {
	/// Classify this operator
	pub fn kind(&self) -> Kind {
		match self {
			Op::Pure(_) | Op::Read(_) => Kind::Source,
			Op::Match(..) | Op::Limit(..) | Op::Skip(..) | Op::Sort(..) | Op::Out(..) => {
				Kind::ShapePreserving
			}
			Op::Project(..) | Op::Redact(..) | Op::Unwind(..) | Op::Group(..) | Op::GeoNear(..) => {
				Kind::ShapeChanging
			}
			Op::Map(..) | Op::FlatMap(..) | Op::Reduce(..) => Kind::Js,
			Op::FoldLeft(..) => Kind::FoldLeft,
			Op::Join(_) => Kind::Join,
		}
	}

	/// Check if this operator has no input
	pub fn is_source(&self) -> bool {
		self.kind() == Kind::Source
	}

	/// Check if this operator has exactly one input
	pub fn is_single_source(&self) -> bool {
		!matches!(self, Op::Pure(_) | Op::Read(_) | Op::FoldLeft(..) | Op::Join(_))
	}

	/// Check if this operator keeps the incoming document shape
	pub fn is_shape_preserving(&self) -> bool {
		self.kind() == Kind::ShapePreserving
	}

	/// Check if this operator can run as a pipeline stage.
	///
	/// A filter with a script predicate cannot, even though filters are
	/// pipelineable as a class.
	pub fn is_pipelineable(&self) -> bool {
		match self {
			Op::Match(_, selector) => selector.is_pipelineable(),
			op => matches!(op.kind(), Kind::ShapePreserving | Kind::ShapeChanging),
		}
	}

	/// The single input of this operator, if it has exactly one
	pub fn src(&self) -> Option<&Workflow> {
		match self {
			Op::Match(src, _)
			| Op::Project(src, ..)
			| Op::Redact(src, _)
			| Op::Limit(src, _)
			| Op::Skip(src, _)
			| Op::Unwind(src, _)
			| Op::Group(src, ..)
			| Op::Sort(src, _)
			| Op::GeoNear(src, _)
			| Op::Out(src, _)
			| Op::Map(src, _)
			| Op::FlatMap(src, _)
			| Op::Reduce(src, _) => Some(src),
			Op::Pure(_) | Op::Read(_) | Op::FoldLeft(..) | Op::Join(_) => None,
		}
	}

	/// Rebuild this operator over a new input. Operators without a single
	/// input are returned unchanged.
	pub fn reparent(&self, src: Workflow) -> Op {
		match self {
			Op::Match(_, selector) => Op::Match(src, selector.clone()),
			Op::Project(_, shape, id) => Op::Project(src, shape.clone(), *id),
			Op::Redact(_, expr) => Op::Redact(src, expr.clone()),
			Op::Limit(_, count) => Op::Limit(src, *count),
			Op::Skip(_, count) => Op::Skip(src, *count),
			Op::Unwind(_, field) => Op::Unwind(src, field.clone()),
			Op::Group(_, grouped, by) => Op::Group(src, grouped.clone(), by.clone()),
			Op::Sort(_, keys) => Op::Sort(src, keys.clone()),
			Op::GeoNear(_, params) => Op::GeoNear(src, params.clone()),
			Op::Out(_, coll) => Op::Out(src, coll.clone()),
			Op::Map(_, f) => Op::Map(src, f.clone()),
			Op::FlatMap(_, f) => Op::FlatMap(src, f.clone()),
			Op::Reduce(_, f) => Op::Reduce(src, f.clone()),
			op => op.clone(),
		}
	}

	/// Rebuild this operator with `f` applied to every immediate child
	pub fn map_children(&self, mut f: impl FnMut(&Workflow) -> Workflow) -> Op {
		match self {
			Op::FoldLeft(head, tail) => Op::FoldLeft(f(head), tail.iter().map(&mut f).collect()),
			Op::Join(sources) => Op::Join(sources.iter().map(&mut f).collect()),
			op => match op.src() {
				Some(src) => op.reparent(f(src)),
				None => op.clone(),
			},
		}
	}

	/// Rebuild this operator with a fallible `f` applied to every child
	pub fn try_map_children<E>(
		&self,
		mut f: impl FnMut(&Workflow) -> Result<Workflow, E>,
	) -> Result<Op, E> {
		match self {
			Op::FoldLeft(head, tail) => {
				let head = f(head)?;
				let tail = tail.iter().map(&mut f).collect::<Result<Vec<_>, E>>()?;
				Ok(Op::FoldLeft(head, tail))
			}
			Op::Join(sources) => {
				let sources = sources.iter().map(&mut f).collect::<Result<BTreeSet<_>, E>>()?;
				Ok(Op::Join(sources))
			}
			op => match op.src() {
				Some(src) => Ok(op.reparent(f(src)?)),
				None => Ok(op.clone()),
			},
		}
	}

	/// The pipeline stage payload of a pipelineable operator
	pub fn pipeline_stage(&self) -> Option<PipelineStage> {
		match self {
			Op::Match(_, selector) => Some(PipelineStage::Match(selector.clone())),
			Op::Project(_, shape, id) => Some(PipelineStage::Project(shape.clone(), *id)),
			Op::Redact(_, expr) => Some(PipelineStage::Redact(expr.clone())),
			Op::Limit(_, count) => Some(PipelineStage::Limit(*count)),
			Op::Skip(_, count) => Some(PipelineStage::Skip(*count)),
			Op::Unwind(_, field) => Some(PipelineStage::Unwind(field.clone())),
			Op::Group(_, grouped, by) => Some(PipelineStage::Group(grouped.clone(), by.clone())),
			Op::Sort(_, keys) => Some(PipelineStage::Sort(keys.clone())),
			Op::GeoNear(_, params) => Some(PipelineStage::GeoNear(params.clone())),
			Op::Out(_, coll) => Some(PipelineStage::Out(coll.clone())),
			_ => None,
		}
	}

	/// The operator name, for diagnostics
	pub(crate) fn name(&self) -> &'static str {
		match self {
			Op::Pure(_) => "Pure",
			Op::Read(_) => "Read",
			Op::Match(..) => "Match",
			Op::Project(..) => "Project",
			Op::Redact(..) => "Redact",
			Op::Limit(..) => "Limit",
			Op::Skip(..) => "Skip",
			Op::Unwind(..) => "Unwind",
			Op::Group(..) => "Group",
			Op::Sort(..) => "Sort",
			Op::GeoNear(..) => "GeoNear",
			Op::Out(..) => "Out",
			Op::Map(..) => "Map",
			Op::FlatMap(..) => "FlatMap",
			Op::Reduce(..) => "Reduce",
			Op::FoldLeft(..) => "FoldLeft",
			Op::Join(_) => "Join",
		}
	}
}

/// An immutable workflow tree.
///
/// Subtrees are reference-counted: transformations that reuse a subtree (a
/// fold built over a shared read, for instance) share it rather than clone.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Workflow(Arc<Op>);

impl Deref for Workflow {
	type Target = Op;
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl Workflow {
	/// Tie the knot around a fully built operator
	pub(crate) fn fix(op: Op) -> Workflow {
		Workflow(Arc::new(op))
	}

	/// The operator at the root of this tree
	pub fn as_op(&self) -> &Op {
		&self.0
	}

	/// A literal source
	pub fn pure(value: impl Into<Bson>) -> Workflow {
		coalesce::coalesce(Op::Pure(value.into()))
	}

	/// A collection read source
	pub fn read(collection: impl Into<Collection>) -> Workflow {
		coalesce::coalesce(Op::Read(collection.into()))
	}

	/// Filter documents by a selector
	pub fn match_(self, selector: Selector) -> Workflow {
		coalesce::coalesce(Op::Match(self, selector))
	}

	/// Reshape documents through a projection
	pub fn project(self, shape: Reshape, id: IdHandling) -> Workflow {
		coalesce::coalesce(Op::Project(self, shape, id))
	}

	/// Prune document subtrees by an expression
	pub fn redact(self, expr: Expr) -> Workflow {
		coalesce::coalesce(Op::Redact(self, expr))
	}

	/// Keep at most `count` documents
	pub fn limit(self, count: i64) -> Workflow {
		coalesce::coalesce(Op::Limit(self, count))
	}

	/// Drop the first `count` documents
	pub fn skip(self, count: i64) -> Workflow {
		coalesce::coalesce(Op::Skip(self, count))
	}

	/// Duplicate each document per element of the array at `field`
	pub fn unwind(self, field: DocVar) -> Workflow {
		coalesce::coalesce(Op::Unwind(self, field))
	}

	/// Group documents by a key, producing accumulated fields
	pub fn group(self, grouped: Grouped, by: GroupBy) -> Workflow {
		coalesce::coalesce(Op::Group(self, grouped, by))
	}

	/// Order documents by a nonempty list of sort keys
	pub fn sort(self, keys: Vec<SortKey>) -> Workflow {
		coalesce::coalesce(Op::Sort(self, keys))
	}

	/// Write the stream to a collection
	pub fn out(self, collection: impl Into<Collection>) -> Workflow {
		coalesce::coalesce(Op::Out(self, collection.into()))
	}

	/// Order documents by distance from a point
	pub fn geo_near(self, params: GeoNearParams) -> Workflow {
		coalesce::coalesce(Op::GeoNear(self, params))
	}

	/// Transform each document through a script function
	pub fn map(self, function: JsFn) -> Workflow {
		coalesce::coalesce(Op::Map(self, function))
	}

	/// Transform each document into zero or more documents
	pub fn flat_map(self, function: JsFn) -> Workflow {
		coalesce::coalesce(Op::FlatMap(self, function))
	}

	/// Combine the documents of each key through a script function
	pub fn reduce(self, function: JsFn) -> Workflow {
		coalesce::coalesce(Op::Reduce(self, function))
	}

	/// Fold one or more arms into the output of a head arm
	pub fn fold_left(
		head: Workflow,
		first: Workflow,
		rest: impl IntoIterator<Item = Workflow>,
	) -> Workflow {
		let mut tail = vec![first];
		tail.extend(rest);
		coalesce::coalesce(Op::FoldLeft(head, tail))
	}

	/// Combine independent sources in parallel
	pub fn join(sources: impl IntoIterator<Item = Workflow>) -> Workflow {
		coalesce::coalesce(Op::Join(sources.into_iter().collect()))
	}

	/// The depth of this tree, computed without recursion
	pub(crate) fn depth(&self) -> usize {
		let mut frontier = vec![(self, 1usize)];
		let mut deepest = 0;
		while let Some((node, depth)) = frontier.pop() {
			deepest = deepest.max(depth);
			match node.as_op() {
				Op::FoldLeft(head, tail) => {
					frontier.push((head, depth + 1));
					frontier.extend(tail.iter().map(|arm| (arm, depth + 1)));
				}
				Op::Join(sources) => {
					frontier.extend(sources.iter().map(|source| (source, depth + 1)));
				}
				op => {
					if let Some(src) = op.src() {
						frontier.push((src, depth + 1));
					}
				}
			}
		}
		deepest
	}

	fn fmt_indented(&self, f: &mut Formatter, indent: usize) -> fmt::Result {
		for _ in 0..indent {
			f.write_str("  ")?;
		}
		let op = self.as_op();
		match op {
			Op::Pure(v) => writeln!(f, "Pure({v})")?,
			Op::Read(c) => writeln!(f, "Read({c})")?,
			Op::Match(_, selector) => writeln!(f, "Match({selector})")?,
			Op::Project(_, shape, id) => writeln!(f, "Project({shape}, {id:?})")?,
			Op::Redact(_, expr) => writeln!(f, "Redact({expr})")?,
			Op::Limit(_, count) => writeln!(f, "Limit({count})")?,
			Op::Skip(_, count) => writeln!(f, "Skip({count})")?,
			Op::Unwind(_, field) => writeln!(f, "Unwind({field})")?,
			Op::Group(_, grouped, by) => writeln!(f, "Group({}, {})", grouped.bson(), by.bson())?,
			Op::Sort(_, keys) => {
				writeln!(f, "Sort({})", crate::fmt::Fmt::comma_separated(keys.iter()))?
			}
			Op::GeoNear(_, params) => writeln!(f, "GeoNear({})", params.distance_field)?,
			Op::Out(_, coll) => writeln!(f, "Out({coll})")?,
			Op::Map(_, function) => writeln!(f, "Map({function})")?,
			Op::FlatMap(_, function) => writeln!(f, "FlatMap({function})")?,
			Op::Reduce(_, function) => writeln!(f, "Reduce({function})")?,
			Op::FoldLeft(..) => writeln!(f, "FoldLeft")?,
			Op::Join(_) => writeln!(f, "Join")?,
		}
		match op {
			Op::FoldLeft(head, tail) => {
				head.fmt_indented(f, indent + 1)?;
				for arm in tail {
					arm.fmt_indented(f, indent + 1)?;
				}
			}
			Op::Join(sources) => {
				for source in sources {
					source.fmt_indented(f, indent + 1)?;
				}
			}
			op => {
				if let Some(src) = op.src() {
					src.fmt_indented(f, indent + 1)?;
				}
			}
		}
		Ok(())
	}
}

impl Display for Workflow {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		self.fmt_indented(f, 0)
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use super::IdHandling::{Exclude, Ignore, Include};

	#[rstest]
	#[case::ignore_unit_left(Ignore, Include, Include)]
	#[case::ignore_unit_right(Include, Ignore, Include)]
	#[case::include_dominates(Include, Exclude, Include)]
	#[case::exclude_over_ignore(Exclude, Ignore, Exclude)]
	#[case::ignore_ignore(Ignore, Ignore, Ignore)]
	fn combine_table(#[case] a: IdHandling, #[case] b: IdHandling, #[case] expected: IdHandling) {
		assert_eq!(a.combine(b), expected);
	}

	#[rstest]
	#[case::right_wins(Include, Exclude, Exclude)]
	#[case::right_wins_over_exclude(Exclude, Include, Include)]
	#[case::ignore_is_right_identity(Exclude, Ignore, Exclude)]
	#[case::ignore_chain_ignore(Ignore, Ignore, Ignore)]
	fn chain_table(#[case] a: IdHandling, #[case] b: IdHandling, #[case] expected: IdHandling) {
		assert_eq!(a.chain(b), expected);
	}

	#[test]
	fn id_handling_laws() {
		let all = [Ignore, Include, Exclude];
		// Exhaustive over every triple: combine is commutative and both
		// operations are associative with Ignore as a unit
		for a in all {
			assert_eq!(a.combine(Ignore), a);
			assert_eq!(Ignore.combine(a), a);
			assert_eq!(a.chain(Ignore), a);
			for b in all {
				assert_eq!(a.combine(b), b.combine(a));
				for c in all {
					assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
					assert_eq!(a.chain(b).chain(c), a.chain(b.chain(c)));
				}
			}
		}
	}

	#[test]
	fn classification() {
		let read = Workflow::read("zips");
		assert!(read.is_source());
		assert!(!read.is_single_source());

		let matched = read.clone().match_(Selector::eq("a", 1));
		assert_eq!(matched.kind(), Kind::ShapePreserving);
		assert!(matched.is_pipelineable());
		assert!(matched.is_single_source());

		let scripted = Workflow::read("zips").match_(Selector::where_clause("this.a > 1"));
		assert!(!scripted.is_pipelineable());

		let grouped = Workflow::read("zips").group(
			Grouped::from(map! { "n" => crate::expr::Accumulator::Sum(Expr::Literal(Bson::Int(1))) }),
			GroupBy::Expr(Expr::field("state")),
		);
		assert_eq!(grouped.kind(), Kind::ShapeChanging);
		assert!(grouped.is_pipelineable());
		assert!(!grouped.is_shape_preserving());

		let mapped = Workflow::read("zips").map(crate::js::identity());
		assert_eq!(mapped.kind(), Kind::Js);
		assert!(!mapped.is_pipelineable());
	}

	#[test]
	fn depth_is_iterative() {
		let mut w = Workflow::read("zips");
		for i in 0..100 {
			w = w.skip(i);
		}
		// Consecutive skips coalesce, so the tree stays shallow
		assert_eq!(w.depth(), 2);
	}

	#[test]
	fn reparent_keeps_payload() {
		let sorted = Workflow::read("a").sort(vec![SortKey::asc("x")]);
		let reparented = sorted.as_op().reparent(Workflow::read("b"));
		assert_eq!(reparented, Op::Sort(Workflow::read("b"), vec![SortKey::asc("x")]));
	}
}
