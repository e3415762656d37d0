use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use relsynth_core::{MetaData, deletion_order};

use crate::adapter::{GenerationContext, RowGenerator, generate_row};
use crate::config::PopulateConfig;
use crate::db::Destination;
use crate::errors::{PopulateError, Result};
use crate::model::{PopulateOptions, PopulationIssue, PopulationReport, TableReport};
use crate::planner::{PlannedTable, PopulationPlan};
use crate::stats::SourceStats;
use crate::story::{StoryContext, StoryInstance, StorySpec, StoryStep};

/// Drives population passes over a planned set of tables.
#[derive(Debug)]
pub struct Populator {
    options: PopulateOptions,
    plan: PopulationPlan,
    stats: SourceStats,
    stories: Vec<StorySpec>,
    last_report: Option<PopulationReport>,
}

impl Populator {
    pub fn new(options: PopulateOptions, plan: PopulationPlan, stats: SourceStats) -> Self {
        Self {
            options,
            plan,
            stats,
            stories: Vec::new(),
            last_report: None,
        }
    }

    pub fn with_story(mut self, story: StorySpec) -> Self {
        self.add_story(story);
        self
    }

    pub fn add_story(&mut self, story: StorySpec) {
        self.stories.push(story);
    }

    pub fn plan(&self) -> &PopulationPlan {
        &self.plan
    }

    pub fn options(&self) -> &PopulateOptions {
        &self.options
    }

    /// Report of the most recent run. After a failed run it holds every pass
    /// and table committed before the abort, with `failure` set.
    pub fn report(&self) -> Option<&PopulationReport> {
        self.last_report.as_ref()
    }

    /// Run every configured pass against `dst`.
    ///
    /// Uniqueness state held by the table generators carries over between
    /// passes. The first fatal error stops the run; the partial report stays
    /// available through [`Populator::report`].
    pub async fn run(&mut self, dst: &mut dyn Destination) -> Result<PopulationReport> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = PopulationReport::new(run_id.clone());

        info!(
            run_id = %run_id,
            passes = self.options.num_passes,
            tables = self.plan.tables.len(),
            stories = self.stories.len(),
            seed = self.options.seed,
            "population started"
        );

        for pass in 0..self.options.num_passes {
            if let Err(err) = self.run_pass(pass, dst, &mut report).await {
                warn!(run_id = %run_id, pass, error = %err, "population failed");
                report.failure = Some(err.to_string());
                self.last_report = Some(report);
                return Err(err);
            }
            report.passes_completed += 1;
        }

        info!(
            run_id = %run_id,
            passes = report.passes_completed,
            rows = report.rows_inserted(),
            skipped = report.rows_skipped(),
            warnings = report.warnings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "population completed"
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    async fn run_pass(
        &mut self,
        pass: u32,
        dst: &mut dyn Destination,
        report: &mut PopulationReport,
    ) -> Result<()> {
        let pass_start = Instant::now();
        let mut pool = self.start_stories(pass)?;
        info!(pass, stories = pool.len(), "pass started");

        let Populator {
            options,
            plan,
            stats,
            ..
        } = self;
        let PopulationPlan { tables, metadata } = plan;

        for planned in tables.iter_mut() {
            let table_start = Instant::now();
            let name = planned.descriptor.name.clone();
            let mut rng =
                ChaCha8Rng::seed_from_u64(hash_seed(options.seed, &format!("table:{name}:{pass}")));

            dst.begin()
                .await
                .map_err(|err| pass_aborted(pass, &name, err))?;
            let outcome = populate_table(
                pass,
                planned,
                metadata,
                stats,
                &mut pool,
                &mut *dst,
                &mut rng,
                report,
            )
            .await;

            let table_report = match outcome {
                Ok(table_report) => table_report,
                Err(err) => {
                    if let Err(rollback) = dst.rollback().await {
                        warn!(pass, table = %name, error = %rollback, "rollback failed");
                    }
                    warn!(pass, table = %name, error = %err, "table rolled back");
                    return Err(pass_aborted(pass, &name, err));
                }
            };
            dst.commit()
                .await
                .map_err(|err| pass_aborted(pass, &name, err))?;

            info!(
                pass,
                table = %name,
                story_rows = table_report.story_rows,
                direct_rows = table_report.direct_rows,
                skipped = table_report.skipped,
                duration_ms = table_start.elapsed().as_millis() as u64,
                "table populated"
            );
            report.tables.push(table_report);
        }

        for instance in &pool {
            if instance.is_completed() {
                report.stories_completed += 1;
            } else if let Some(table) = instance.pending_table() {
                warn!(
                    pass,
                    story = %instance.name(),
                    ordinal = instance.ordinal(),
                    table = %table,
                    "story stalled on a table already populated this pass"
                );
                report.stories_stalled += 1;
                report.record_warning(PopulationIssue {
                    code: "story_stalled".to_string(),
                    message: format!(
                        "story '{}' #{} still waits on '{table}'",
                        instance.name(),
                        instance.ordinal()
                    ),
                    pass,
                    table: Some(table.to_string()),
                    story: Some(instance.name().to_string()),
                });
            }
        }

        info!(
            pass,
            rows = report.pass(pass).map(TableReport::inserted).sum::<u64>(),
            duration_ms = pass_start.elapsed().as_millis() as u64,
            "pass completed"
        );
        Ok(())
    }

    fn start_stories(&self, pass: u32) -> Result<Vec<StoryInstance>> {
        let mut pool = Vec::new();
        for spec in &self.stories {
            for ordinal in 0..spec.per_pass {
                let ctx = StoryContext {
                    pass,
                    ordinal,
                    seed: hash_seed(
                        self.options.seed,
                        &format!("story:{}:{pass}:{ordinal}", spec.name),
                    ),
                    stats: &self.stats,
                };
                let story = spec
                    .factory
                    .create(&ctx)
                    .map_err(|err| PopulateError::StoryFault {
                        story: spec.name.clone(),
                        message: err.to_string(),
                    })?;
                let mut instance = StoryInstance::new(&spec.name, ordinal, story);
                instance.start()?;
                pool.push(instance);
            }
        }
        Ok(pool)
    }
}

#[allow(clippy::too_many_arguments)]
async fn populate_table(
    pass: u32,
    planned: &mut PlannedTable,
    metadata: &MetaData,
    stats: &SourceStats,
    pool: &mut [StoryInstance],
    dst: &mut dyn Destination,
    rng: &mut ChaCha8Rng,
    report: &mut PopulationReport,
) -> Result<TableReport> {
    let PlannedTable {
        descriptor,
        rows_per_pass,
        generator,
    } = planned;
    let mut table_report = TableReport::new(pass, &descriptor.name);
    let mut ctx = GenerationContext {
        pass,
        table: descriptor,
        metadata,
        stats,
        dst,
        rng,
    };

    for instance in pool.iter_mut() {
        while instance.pending_table() == Some(descriptor.name.as_str()) {
            match instance.insert_pending(generator.as_mut(), &mut ctx).await? {
                StoryStep::Inserted(_) => table_report.story_rows += 1,
                StoryStep::Abandoned(err) => {
                    warn!(
                        pass,
                        story = %instance.name(),
                        ordinal = instance.ordinal(),
                        table = %descriptor.name,
                        error = %err,
                        "story abandoned"
                    );
                    report.stories_abandoned += 1;
                    report.record_warning(PopulationIssue {
                        code: "story_abandoned".to_string(),
                        message: err.to_string(),
                        pass,
                        table: Some(descriptor.name.clone()),
                        story: Some(instance.name().to_string()),
                    });
                }
            }
        }
    }

    for row_index in 0..*rows_per_pass {
        match insert_direct(generator.as_mut(), &mut ctx).await {
            Ok(()) => table_report.direct_rows += 1,
            Err(err) if err.is_row_level() => {
                warn!(
                    pass,
                    table = %descriptor.name,
                    row = row_index,
                    error = %err,
                    "row skipped"
                );
                table_report.skipped += 1;
                report.record_warning(PopulationIssue {
                    code: "row_skipped".to_string(),
                    message: err.to_string(),
                    pass,
                    table: Some(descriptor.name.clone()),
                    story: None,
                });
            }
            Err(err) => return Err(err),
        }
    }

    Ok(table_report)
}

async fn insert_direct(
    generator: &mut dyn RowGenerator,
    ctx: &mut GenerationContext<'_>,
) -> Result<()> {
    let row = generate_row(generator, ctx).await?;
    ctx.dst.insert_row(ctx.table, &row).await?;
    Ok(())
}

fn pass_aborted(pass: u32, table: &str, source: PopulateError) -> PopulateError {
    PopulateError::PassAborted {
        pass,
        table: table.to_string(),
        source: Box::new(source),
    }
}

/// Delete every generated row, children before parents.
///
/// Ignored and vocabulary tables are left untouched. Each table is emptied
/// in its own transaction.
pub async fn remove_data(
    dst: &mut dyn Destination,
    metadata: &MetaData,
    config: &PopulateConfig,
) -> Result<Vec<(String, u64)>> {
    let mut removed = Vec::new();
    for idx in deletion_order(&metadata.tables)? {
        let table = &metadata.tables[idx];
        if config.is_skipped(&table.name) {
            debug!(table = %table.name, "table kept");
            continue;
        }
        dst.begin().await?;
        match dst.delete_all(table).await {
            Ok(count) => {
                dst.commit().await?;
                info!(table = %table.name, rows = count, "table emptied");
                removed.push((table.name.clone(), count));
            }
            Err(err) => {
                if let Err(rollback) = dst.rollback().await {
                    warn!(table = %table.name, error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        }
    }
    Ok(removed)
}

/// FNV-1a over `key`, offset by `seed`.
fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
