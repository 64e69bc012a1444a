//! End-to-end compiles through the public API: build a workflow with the
//! smart constructors, compile it, and check the shape of the task tree.

use docflow_core::expr::{Accumulator, DocVar, Expr, GroupBy, Grouped, Reshape, Selector, SortKey};
use docflow_core::task::{OutAction, PipelineStage, Task, task};
use docflow_core::workflow::{IdHandling, Workflow, merge};
use docflow_core::{js, map};

fn read() -> Workflow {
	Workflow::read("zips")
}

#[test]
fn filters_and_limits_compile_to_one_pipeline() {
	let compiled = task(
		&read()
			.match_(Selector::eq("state", "NY"))
			.match_(Selector::eq("city", "ALBANY"))
			.skip(10)
			.limit(5),
	)
	.unwrap();
	let Task::Pipeline(upstream, stages) = compiled else {
		panic!("expected a pipeline");
	};
	assert_eq!(*upstream, Task::Read("zips".into()));
	// The filters fused at construction, and the limit slid below the skip
	assert_eq!(
		stages,
		vec![
			PipelineStage::Match(
				Selector::eq("state", "NY").and(Selector::eq("city", "ALBANY"))
			),
			PipelineStage::Limit(15),
			PipelineStage::Skip(10),
		]
	);
}

#[test]
fn aggregation_compiles_with_its_key() {
	let compiled = task(&read().group(
		Grouped::from(map! {
			"population".to_string() => Accumulator::Sum(Expr::field("pop")),
		}),
		GroupBy::Expr(Expr::field("state")),
	))
	.unwrap();
	let Task::Pipeline(upstream, stages) = compiled else {
		panic!("expected a pipeline");
	};
	assert_eq!(*upstream, Task::Read("zips".into()));
	assert_eq!(stages.len(), 1);
	assert_eq!(
		stages[0].bson().to_string(),
		"{ \"$group\": { \"_id\": \"$state\", \"population\": { \"$sum\": \"$pop\" } } }"
	);
}

#[test]
fn scripted_stages_compile_to_a_single_job() {
	let compiled = task(
		&read()
			.match_(Selector::eq("state", "NY"))
			.sort(vec![SortKey::asc("pop")])
			.limit(100)
			.map(js::identity()),
	)
	.unwrap();
	let Task::MapReduce(upstream, spec) = compiled else {
		panic!("expected a map-reduce job");
	};
	assert_eq!(*upstream, Task::Read("zips".into()));
	assert_eq!(spec.selection, Some(Selector::eq("state", "NY")));
	assert_eq!(spec.input_sort, Some(vec![SortKey::asc("pop")]));
	assert_eq!(spec.limit, Some(100));
	assert_eq!(spec.reduce, js::nop_reduce());
}

#[test]
fn merged_scripted_workflows_compile_to_a_fold() {
	let (bases, merged) = merge(&read().map(js::identity()), &read());
	assert_eq!(bases, (DocVar::field("rIght"), DocVar::field("lEft")));
	let compiled = task(&merged).unwrap();
	let Task::FoldLeft(_, arms) = compiled else {
		panic!("expected a fold");
	};
	for arm in &arms {
		let Task::MapReduce(_, spec) = arm else {
			panic!("expected a map-reduce arm");
		};
		assert_eq!(spec.out, Some(OutAction::Reduce));
	}
}

#[test]
fn projections_reach_the_wire_with_their_id_discipline() {
	let compiled = task(&read().project(
		Reshape::field("city", Expr::field("city")),
		IdHandling::Exclude,
	))
	.unwrap();
	let Task::Pipeline(_, stages) = compiled else {
		panic!("expected a pipeline");
	};
	assert_eq!(
		stages[0].bson().to_string(),
		"{ \"$project\": { \"_id\": false, \"city\": \"$city\" } }"
	);
}

#[test]
fn task_trees_round_trip_through_serde() {
	let compiled = task(
		&read().match_(Selector::eq("state", "NY")).map(js::identity()),
	)
	.unwrap();
	let encoded = serde_json::to_string(&compiled).unwrap();
	let decoded: Task = serde_json::from_str(&encoded).unwrap();
	assert_eq!(decoded, compiled);
}

