//! Lowering a workflow tree to the executable task tree. The crusher walks
//! the tree bottom-up, carrying for each subtree both the crushed task and
//! a base path telling downstream stages where the logical document root
//! now lives. Runs of pipelineable operators accumulate into one pipeline;
//! scripted operators become map-reduce jobs, absorbing an adjacent
//! match/sort/limit prefix into the job's options when possible.

use anyhow::Result;

use crate::cnf::MAX_PLAN_DEPTH;
use crate::err::Error;
use crate::expr::{DocVar, Selector, SortKey};
use crate::js::{self, JsFn};
use crate::task::{MapReduceSpec, OutAction, PipelineStage, Task};
use crate::workflow::rewrite::rebase;
use crate::workflow::{Op, Workflow, expr_var, finalize, finish};

/// The three scripted operator shapes the crusher lowers to map-reduce.
#[derive(Clone, Copy, PartialEq)]
enum Script {
	Map,
	FlatMap,
	Reduce,
}

/// Compile a workflow to an executable task.
///
/// The workflow is first stripped of unused fields and normalised, then
/// crushed; the final base adjustment is folded into the returned task, so
/// the base itself is deliberately discarded.
pub fn task(op: &Workflow) -> Result<Task> {
	let depth = op.depth();
	if depth > *MAX_PLAN_DEPTH {
		return Err(Error::PlanDepth(*MAX_PLAN_DEPTH).into());
	}
	let normalized = finalize(&finish(op));
	let (base, crushed) = crush(&normalized)?;
	let (_, finished) = Task::finish(base, crushed);
	debug!(depth, "compiled workflow to task");
	Ok(finished)
}

/// Lower a workflow to a task, returning the base path under which the
/// logical document root of its output lives.
pub fn crush(op: &Workflow) -> Result<(DocVar, Task)> {
	match op.as_op() {
		Op::Pure(value) => Ok((DocVar::Root, Task::Pure(value.clone()))),
		Op::Read(collection) => Ok((DocVar::Root, Task::Read(collection.clone()))),
		node if node.is_pipelineable() => {
			let (base, upstream, stages) = pipeline(op)?;
			Ok((base, Task::pipeline(upstream, stages)))
		}
		// A filter with a script predicate runs as the query of a job
		Op::Match(src, selector) => {
			let (base, upstream) = crush(src)?;
			let selector = rebase_selector(selector, &base);
			let map = match base {
				DocVar::Root => js::identity(),
				base => js::select(&base),
			};
			let mut spec = MapReduceSpec::new(map, js::nop_reduce());
			spec.selection = Some(selector);
			Ok((expr_var(), Task::MapReduce(Box::new(upstream), spec)))
		}
		Op::Map(src, function) => script(src, Script::Map, function),
		Op::FlatMap(src, function) => script(src, Script::FlatMap, function),
		Op::Reduce(src, function) => script(src, Script::Reduce, function),
		Op::FoldLeft(head, tail) => {
			let (_, head_task) = crush(head)?;
			let mut arms = Vec::with_capacity(tail.len());
			for arm in tail {
				match crush(arm)?.1 {
					Task::MapReduce(upstream, mut spec) => {
						spec.out = Some(OutAction::Reduce);
						arms.push(Task::MapReduce(upstream, spec));
					}
					other => {
						return Err(Error::InvalidFoldArm(other.name().to_string()).into());
					}
				}
			}
			Ok((expr_var(), Task::FoldLeft(Box::new(head_task), arms)))
		}
		Op::Join(sources) => {
			let tasks = sources
				.iter()
				.map(|source| crush(source).map(|(_, task)| task))
				.collect::<Result<_>>()?;
			Ok((DocVar::Root, Task::Join(tasks)))
		}
		// Every remaining variant is pipelineable and taken above
		op => bug!("the operator {} escaped the pipeline lowering", op.name()),
	}
}

/// Accumulate a run of pipelineable operators into one stage list over the
/// crushed task below it. Descends only through pipelineable nodes, rebasing
/// each stage by the running base.
fn pipeline(op: &Workflow) -> Result<(DocVar, Task, Vec<PipelineStage>)> {
	let Some(src) = op.src() else {
		bug!("the pipelineable operator {} has no source", op.name())
	};
	let (base, upstream, mut stages) = if src.is_pipelineable() {
		pipeline(src)?
	} else {
		let (base, task) = crush(src)?;
		(base, task, Vec::new())
	};
	let rewritten = rebase(op.as_op(), &base);
	let base = match rewritten {
		Op::Group(..) | Op::Project(..) => DocVar::Root,
		_ => base,
	};
	match rewritten.pipeline_stage() {
		Some(stage) => stages.push(stage),
		None => bug!("the operator {} has no pipeline form", rewritten.name()),
	}
	Ok((base, upstream, stages))
}

/// Lower a scripted operator over its crushed child.
fn script(src: &Workflow, kind: Script, function: &JsFn) -> Result<(DocVar, Task)> {
	let (base, child) = crush(src)?;
	let task = match child {
		// An open finalizer slot takes a trailing map in place
		Task::MapReduce(upstream, mut spec)
			if kind == Script::Map && spec.finalizer.is_none() =>
		{
			spec.finalizer = Some(js::finalizer_fn(function));
			Task::MapReduce(upstream, spec)
		}
		// A job still carrying the no-op reducer takes a reduce in place
		Task::MapReduce(upstream, mut spec)
			if kind == Script::Reduce && spec.reduce == js::nop_reduce() =>
		{
			spec.reduce = function.clone();
			Task::MapReduce(upstream, spec)
		}
		Task::Pipeline(upstream, stages) => match absorb(&stages) {
			// A match/sort/limit prefix becomes the job's options
			Some((selection, input_sort, limit)) => {
				let mut spec = job(kind, function, &base);
				spec.selection = selection;
				spec.input_sort = input_sort;
				spec.limit = limit;
				Task::MapReduce(upstream, spec)
			}
			None => Task::MapReduce(
				Box::new(Task::Pipeline(upstream, stages)),
				job(kind, function, &base),
			),
		},
		child => Task::MapReduce(Box::new(child), job(kind, function, &base)),
	};
	Ok((expr_var(), task))
}

/// Build the job specification for a scripted operator, projecting the base
/// into place when the document root has moved.
fn job(kind: Script, function: &JsFn, base: &DocVar) -> MapReduceSpec {
	let projection = match base {
		DocVar::Root => None,
		base => Some(js::select(base)),
	};
	match kind {
		Script::Map | Script::FlatMap => {
			let map = match &projection {
				Some(selected) => js::compose(function, selected),
				None => function.clone(),
			};
			MapReduceSpec::new(map, js::nop_reduce())
		}
		Script::Reduce => {
			let map = projection.unwrap_or_else(js::identity);
			MapReduceSpec::new(map, function.clone())
		}
	}
}

/// Match a stage list of the exact form `[Match?, Sort?, Limit?]`, in that
/// order. Anything else is not absorbable into a map-reduce job.
#[allow(clippy::type_complexity)]
fn absorb(
	stages: &[PipelineStage],
) -> Option<(Option<Selector>, Option<Vec<SortKey>>, Option<i64>)> {
	let mut index = 0;
	let mut selection = None;
	let mut input_sort = None;
	let mut limit = None;
	if let Some(PipelineStage::Match(selector)) = stages.get(index) {
		selection = Some(selector.clone());
		index += 1;
	}
	if let Some(PipelineStage::Sort(keys)) = stages.get(index) {
		input_sort = Some(keys.clone());
		index += 1;
	}
	if let Some(PipelineStage::Limit(count)) = stages.get(index) {
		limit = Some(*count);
		index += 1;
	}
	if index == stages.len() && index > 0 {
		Some((selection, input_sort, limit))
	} else {
		None
	}
}

/// Prefix every field of a selector with a base path.
fn rebase_selector(selector: &Selector, base: &DocVar) -> Selector {
	match base.path() {
		None => selector.clone(),
		Some(prefix) => selector.map_up_fields(&|path| prefix.concat(path)),
	}
}
