use std::collections::BTreeSet;

use relsynth_core::{MetaData, Row, Value};
use relsynth_populate::{
    Destination, GeneratorRegistry, InMemoryDatabase, PopulateConfig, PopulateError, Populator,
    Result, ScriptedStory, SourceStats, StatQuery, Story, StoryContext, StoryRequest, StorySpec,
    build_plan, collect_stats, from_fn, remove_data,
};

fn metadata() -> MetaData {
    serde_json::from_str(include_str!("fixtures/clinic.metadata.json")).expect("parse metadata")
}

fn config(source: &str) -> PopulateConfig {
    let base = r#"
[tables.concept]
vocabulary_table = true
"#;
    toml::from_str(&format!("{source}\n{base}")).expect("parse config")
}

fn populator(config: &PopulateConfig, registry: GeneratorRegistry, stats: SourceStats) -> Populator {
    let plan = build_plan(&metadata(), config, registry, &stats).expect("build plan");
    Populator::new(config.options(), plan, stats)
}

fn database() -> InMemoryDatabase {
    InMemoryDatabase::new(metadata().tables)
}

fn person_then_visit(_: &StoryContext<'_>) -> Result<Box<dyn Story>> {
    Ok(Box::new(
        ScriptedStory::new()
            .then(|_| Ok(StoryRequest::new("person")))
            .then(|rows| {
                Ok(StoryRequest::new("visit")
                    .set("person_id", rows[0]["person_id"].clone())
                    .set("kind", "checkup"))
            }),
    ))
}

fn column(dst: &InMemoryDatabase, table: &str, column: &str) -> Vec<Value> {
    dst.rows(table)
        .iter()
        .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

#[tokio::test]
async fn story_rows_reference_the_keys_returned_by_earlier_inserts() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 5
[tables.person.columns.code]
rule = "text_pattern"
pattern = "P{n}-{n}"
[tables.visit]
num_rows_per_pass = 0
"#,
    );
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .with_story(StorySpec::new("checkup", 3, person_then_visit));
    let mut dst = database();

    let report = populator.run(&mut dst).await.expect("run");

    assert_eq!(
        column(&dst, "visit", "person_id"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
    assert_eq!(dst.rows("person").len(), 8);
    assert_eq!(report.stories_completed, 3);
    let person = report.pass(0).find(|table| table.table == "person").unwrap();
    assert_eq!((person.story_rows, person.direct_rows), (3, 5));
}

#[tokio::test]
async fn parents_are_fully_inserted_before_children() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 4
[tables.visit]
num_rows_per_pass = 6
"#,
    );
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .with_story(StorySpec::new("checkup", 2, person_then_visit));
    let mut dst = database();

    populator.run(&mut dst).await.expect("run");

    let log = dst.insert_log();
    let last_person = log.iter().rposition(|table| table == "person").unwrap();
    let first_visit = log.iter().position(|table| table == "visit").unwrap();
    assert!(last_person < first_visit, "insert order was {log:?}");
    assert_eq!(log.len(), 14);
    let person_ids: BTreeSet<_> = column(&dst, "person", "person_id").into_iter().map(|v| v.key()).collect();
    for id in column(&dst, "visit", "person_id") {
        assert!(person_ids.contains(&id.key()));
    }
}

#[tokio::test]
async fn uniqueness_exhaustion_aborts_the_pass_and_rolls_back_the_table() {
    let config = config(
        r#"
max_unique_tries = 2
[tables.person]
num_rows_per_pass = 3
[tables.person.columns.code]
rule = "constant"
value = "same"
"#,
    );
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new());
    let mut dst = database();

    let err = populator.run(&mut dst).await.unwrap_err();
    match err {
        PopulateError::PassAborted { pass, table, source } => {
            assert_eq!(pass, 0);
            assert_eq!(table, "person");
            assert!(matches!(
                *source,
                PopulateError::UniquenessExhausted { attempts: 3, .. }
            ));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(dst.rows("person").is_empty());
    assert!(dst.rows("visit").is_empty());
    assert!(!dst.in_transaction());
}

#[tokio::test]
async fn uniqueness_state_carries_across_passes() {
    let config = config(
        r#"
num_passes = 4
max_unique_tries = 50
[tables.person]
num_rows_per_pass = 1
[tables.person.columns.code]
rule = "choice"
values = ["a", "b", "c"]
"#,
    );
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new());
    let mut dst = database();

    let err = populator.run(&mut dst).await.unwrap_err();
    assert!(matches!(err, PopulateError::PassAborted { pass: 3, .. }));

    let codes: BTreeSet<_> = column(&dst, "person", "code").into_iter().map(|v| v.key()).collect();
    assert_eq!(codes.len(), 3);
    assert_eq!(dst.rows("visit").len(), 3);
}

#[tokio::test]
async fn aborted_runs_keep_the_report_of_committed_passes() {
    let config = config(
        r#"
num_passes = 2
max_unique_tries = 50
[tables.person]
num_rows_per_pass = 2
[tables.person.columns.code]
rule = "choice"
values = ["a", "b"]
[tables.visit]
num_rows_per_pass = 1
"#,
    );
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new());
    let mut dst = database();

    let err = populator.run(&mut dst).await.unwrap_err();
    assert!(matches!(err, PopulateError::PassAborted { pass: 1, .. }));

    let report = populator.report().expect("partial report");
    assert_eq!(report.passes_completed, 1);
    let pass0: Vec<_> = report
        .pass(0)
        .map(|table| (table.table.as_str(), table.direct_rows))
        .collect();
    assert_eq!(pass0, vec![("person", 2), ("visit", 1)]);
    assert_eq!(report.pass(1).count(), 0);
    assert!(report.failure.as_deref().unwrap_or_default().contains("pass 1 aborted"));
    assert_eq!(dst.rows("person").len(), 2);
}

#[tokio::test]
async fn rejected_rows_are_skipped_and_reported() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 3
[tables.visit]
num_rows_per_pass = 2
"#,
    );
    let registry = GeneratorRegistry::new().with(
        "person",
        from_fn(|_, _| Ok(Row::from([("code".to_string(), Value::from("dup"))]))),
    );
    let mut populator = populator(&config, registry, SourceStats::new());
    let mut dst = database();

    let report = populator.run(&mut dst).await.expect("run");

    let person = report.pass(0).find(|table| table.table == "person").unwrap();
    assert_eq!((person.direct_rows, person.skipped), (1, 2));
    assert_eq!(report.warnings_by_code.get("row_skipped"), Some(&2));
    assert_eq!(dst.rows("visit").len(), 2);
}

#[tokio::test]
async fn stories_waiting_on_earlier_tables_are_reported_as_stalled() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 1
[tables.visit]
num_rows_per_pass = 0
"#,
    );
    let backwards = |_: &StoryContext<'_>| -> Result<Box<dyn Story>> {
        Ok(Box::new(
            ScriptedStory::new()
                .then(|_| Ok(StoryRequest::new("visit")))
                .then(|_| Ok(StoryRequest::new("person"))),
        ))
    };
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .with_story(StorySpec::new("backwards", 1, backwards));
    let mut dst = database();

    let report = populator.run(&mut dst).await.expect("run");

    assert_eq!(report.stories_stalled, 1);
    assert_eq!(report.stories_completed, 0);
    assert_eq!(report.warnings_by_code.get("story_stalled"), Some(&1));
    assert_eq!(dst.rows("visit").len(), 1);
}

#[tokio::test]
async fn rejected_story_rows_abandon_only_that_story() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 1
[tables.visit]
num_rows_per_pass = 2
"#,
    );
    let dangling = |_: &StoryContext<'_>| -> Result<Box<dyn Story>> {
        Ok(Box::new(
            ScriptedStory::new()
                .then(|_| Ok(StoryRequest::new("visit").set("person_id", 999)))
                .then(|_| Ok(StoryRequest::new("visit"))),
        ))
    };
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .with_story(StorySpec::new("dangling", 1, dangling))
        .with_story(StorySpec::new("checkup", 1, person_then_visit));
    let mut dst = database();

    let report = populator.run(&mut dst).await.expect("run");

    assert_eq!(report.stories_abandoned, 1);
    assert_eq!(report.stories_completed, 1);
    let visit = report.pass(0).find(|table| table.table == "visit").unwrap();
    assert_eq!((visit.story_rows, visit.direct_rows), (1, 2));
}

#[tokio::test]
async fn story_faults_abort_the_pass() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 2
"#,
    );
    let faulty = |_: &StoryContext<'_>| -> Result<Box<dyn Story>> {
        Ok(Box::new(
            ScriptedStory::new()
                .then(|_| Ok(StoryRequest::new("person")))
                .then(|_| Err(PopulateError::InvalidPlan("no visit today".to_string()))),
        ))
    };
    let mut populator = populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .with_story(StorySpec::new("faulty", 1, faulty));
    let mut dst = database();

    let err = populator.run(&mut dst).await.unwrap_err();
    match err {
        PopulateError::PassAborted { table, source, .. } => {
            assert_eq!(table, "person");
            assert!(matches!(*source, PopulateError::StoryFault { ref story, .. } if story == "faulty"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(dst.rows("person").is_empty());
}

#[tokio::test]
async fn same_seed_produces_the_same_rows() {
    let source = r#"
seed = 7
num_passes = 2
[tables.person]
num_rows_per_pass = 4
[tables.person.columns.name]
rule = "fake"
kind = "name"
[tables.person.columns.code]
rule = "uuid"
[tables.visit]
num_rows_per_pass = 3
[tables.visit.columns.kind]
rule = "choice"
values = ["inpatient", "outpatient", "emergency"]
"#;
    let mut first = database();
    populator(&config(source), GeneratorRegistry::new(), SourceStats::new())
        .run(&mut first)
        .await
        .expect("first run");
    let mut second = database();
    populator(&config(source), GeneratorRegistry::new(), SourceStats::new())
        .run(&mut second)
        .await
        .expect("second run");

    assert_eq!(first.rows("person"), second.rows("person"));
    assert_eq!(first.rows("visit"), second.rows("visit"));
    assert_eq!(first.rows("person").len(), 8);
}

#[tokio::test]
async fn sampled_columns_follow_source_statistics() {
    let query = "SELECT count(*) AS num, name FROM person GROUP BY name";
    let mut source = InMemoryDatabase::new(Vec::new());
    source.set_query_result(
        query,
        vec![
            Row::from([("num".to_string(), Value::Int(9)), ("name".to_string(), Value::from("Ada"))]),
            Row::from([("num".to_string(), Value::Int(1)), ("name".to_string(), Value::from("Bob"))]),
        ],
    );
    let stats = collect_stats(
        &mut source,
        &[StatQuery {
            name: "person_name".to_string(),
            query: query.to_string(),
        }],
    )
    .await
    .expect("collect stats");

    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 40
[tables.person.columns.name]
rule = "sample_stat"
stat = "person_name"
weights_column = "num"
[tables.visit]
num_rows_per_pass = 0
"#,
    );
    let mut dst = database();
    populator(&config, GeneratorRegistry::new(), stats)
        .run(&mut dst)
        .await
        .expect("run");

    let names = column(&dst, "person", "name");
    assert_eq!(names.len(), 40);
    let ada = names.iter().filter(|name| **name == Value::from("Ada")).count();
    assert!(names.iter().all(|name| *name == Value::from("Ada") || *name == Value::from("Bob")));
    assert!(ada > 20, "Ada drawn {ada} times");
}

#[tokio::test]
async fn remove_data_empties_children_first_and_keeps_vocabulary() {
    let config = config(
        r#"
[tables.person]
num_rows_per_pass = 2
[tables.visit]
num_rows_per_pass = 3
"#,
    );
    let metadata = metadata();
    let mut dst = database();
    let concept = metadata.table("concept").unwrap().clone();
    dst.insert_row(
        &concept,
        &Row::from([("label".to_string(), Value::from("Outpatient"))]),
    )
    .await
    .expect("seed vocabulary");
    populator(&config, GeneratorRegistry::new(), SourceStats::new())
        .run(&mut dst)
        .await
        .expect("run");

    let removed = remove_data(&mut dst, &metadata, &config).await.expect("remove");

    assert_eq!(
        removed,
        vec![("visit".to_string(), 3), ("person".to_string(), 2)]
    );
    assert!(dst.rows("person").is_empty());
    assert_eq!(dst.rows("concept").len(), 1);
}
