//! The executable task tree: what the crusher lowers a workflow into. A
//! task is a literal, a collection read, an aggregation pipeline over an
//! upstream task, a map-reduce job, a fold of map-reduce arms into a head,
//! or a parallel join.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::expr::{DocVar, Expr, GroupBy, Grouped, Reshape, Selector, SortKey, sort::sort_bson};
use crate::js::JsFn;
use crate::val::{Bson, Document};
use crate::workflow::{Collection, EXPR_NAME, GeoNearParams, IdHandling};

pub(crate) mod crush;

pub use self::crush::{crush, task};

/// A single pipeline operator, detached from its input.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum PipelineStage {
	Match(Selector),
	Project(Reshape, IdHandling),
	Redact(Expr),
	Limit(i64),
	Skip(i64),
	Unwind(DocVar),
	Group(Grouped, GroupBy),
	Sort(Vec<SortKey>),
	GeoNear(GeoNearParams),
	Out(Collection),
}

impl PipelineStage {
	/// Render this stage as its pipeline document
	pub fn bson(&self) -> Bson {
		let stage = |name: &str, value: Bson| {
			Bson::Doc(Document::from(map! { name.to_string() => value }))
		};
		match self {
			PipelineStage::Match(selector) => stage("$match", selector.bson()),
			PipelineStage::Project(shape, id) => {
				let mut doc = match shape.bson() {
					Bson::Doc(doc) => doc,
					other => Document::from(map! { "" => other }),
				};
				// The `_id` discipline always wins over the shape contents
				match id {
					IdHandling::Include => {
						doc.insert("_id".to_string(), Bson::Bool(true));
					}
					IdHandling::Exclude => {
						doc.insert("_id".to_string(), Bson::Bool(false));
					}
					IdHandling::Ignore => (),
				}
				stage("$project", Bson::Doc(doc))
			}
			PipelineStage::Redact(expr) => stage("$redact", expr.bson()),
			PipelineStage::Limit(count) => stage("$limit", Bson::Int(*count)),
			PipelineStage::Skip(count) => stage("$skip", Bson::Int(*count)),
			PipelineStage::Unwind(field) => stage("$unwind", Bson::from(field.to_string())),
			PipelineStage::Group(grouped, by) => {
				let mut doc = match grouped.bson() {
					Bson::Doc(doc) => doc,
					other => Document::from(map! { "" => other }),
				};
				doc.insert("_id".to_string(), by.bson());
				stage("$group", Bson::Doc(doc))
			}
			PipelineStage::Sort(keys) => stage("$sort", sort_bson(keys)),
			PipelineStage::GeoNear(params) => {
				let mut doc = BTreeMap::new();
				doc.insert(
					"near".to_string(),
					Bson::Array(vec![Bson::Float(params.near.0), Bson::Float(params.near.1)]),
				);
				doc.insert(
					"distanceField".to_string(),
					Bson::from(params.distance_field.to_string()),
				);
				doc.insert("spherical".to_string(), Bson::Bool(params.spherical));
				doc.insert("uniqueDocs".to_string(), Bson::Bool(params.unique_docs));
				if let Some(limit) = params.limit {
					doc.insert("limit".to_string(), Bson::Int(limit));
				}
				if let Some(distance) = params.max_distance {
					doc.insert("maxDistance".to_string(), Bson::Float(distance));
				}
				if let Some(query) = &params.query {
					doc.insert("query".to_string(), query.bson());
				}
				if let Some(multiplier) = params.distance_multiplier {
					doc.insert("distanceMultiplier".to_string(), Bson::Float(multiplier));
				}
				if let Some(locs) = &params.include_locs {
					doc.insert("includeLocs".to_string(), Bson::from(locs.to_string()));
				}
				stage("$geoNear", Bson::Doc(Document(doc)))
			}
			PipelineStage::Out(collection) => {
				stage("$out", Bson::from(collection.0.clone()))
			}
		}
	}
}

impl Display for PipelineStage {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.bson(), f)
	}
}

/// The output action of a map-reduce job.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum OutAction {
	/// Replace the target collection
	Replace,
	/// Merge into the target collection, new keys winning
	Merge,
	/// Reduce into the target collection through the job's reducer
	Reduce,
}

/// The specification of one map-reduce job.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MapReduceSpec {
	pub map: JsFn,
	pub reduce: JsFn,
	/// Query filtering the input documents
	pub selection: Option<Selector>,
	/// Sort applied to the input before mapping
	pub input_sort: Option<Vec<SortKey>>,
	/// Cap on the number of input documents
	pub limit: Option<i64>,
	/// Function applied to each reduced value
	pub finalizer: Option<JsFn>,
	/// Variables in scope inside the scripted functions
	pub scope: BTreeMap<String, Bson>,
	/// Output action; fold arms reduce into their target
	pub out: Option<OutAction>,
}

impl MapReduceSpec {
	/// A job with the given scripts and no options
	pub fn new(map: JsFn, reduce: JsFn) -> MapReduceSpec {
		MapReduceSpec {
			map,
			reduce,
			selection: None,
			input_sort: None,
			limit: None,
			finalizer: None,
			scope: BTreeMap::new(),
			out: None,
		}
	}
}

/// An executable task tree.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Task {
	Pure(Bson),
	Read(Collection),
	Pipeline(Box<Task>, Vec<PipelineStage>),
	MapReduce(Box<Task>, MapReduceSpec),
	/// A head task plus a nonempty tail of map-reduce arms reduced into it
	FoldLeft(Box<Task>, Vec<Task>),
	Join(BTreeSet<Task>),
}

impl Task {
	/// Extend an upstream pipeline task, or open a new pipeline over any
	/// other task.
	pub fn pipeline(upstream: Task, stages: Vec<PipelineStage>) -> Task {
		match upstream {
			Task::Pipeline(inner, mut existing) => {
				existing.extend(stages);
				Task::Pipeline(inner, existing)
			}
			other => Task::Pipeline(Box::new(other), stages),
		}
	}

	/// Adjust a crushed task so its output root is the document root.
	///
	/// A non-root base is relocated under the map-reduce output convention
	/// with a trailing projection; the returned base then names that field.
	/// The top-level compile discards the returned base, because the task
	/// already contains the adjustment.
	pub fn finish(base: DocVar, task: Task) -> (DocVar, Task) {
		match (base, task) {
			(DocVar::Root, task) => (DocVar::Root, task),
			// A job or fold already emits under the output convention
			(base, task @ (Task::MapReduce(..) | Task::FoldLeft(..)))
				if base == DocVar::field(EXPR_NAME) =>
			{
				(base, task)
			}
			(base, task) => {
				let shape = Reshape::field(EXPR_NAME, Expr::Var(base));
				(
					DocVar::field(EXPR_NAME),
					Task::pipeline(task, vec![PipelineStage::Project(shape, IdHandling::Ignore)]),
				)
			}
		}
	}

	/// The task variant name, for diagnostics
	pub(crate) fn name(&self) -> &'static str {
		match self {
			Task::Pure(_) => "Pure",
			Task::Read(_) => "Read",
			Task::Pipeline(..) => "Pipeline",
			Task::MapReduce(..) => "MapReduce",
			Task::FoldLeft(..) => "FoldLeft",
			Task::Join(_) => "Join",
		}
	}
}
