//! Temporal feature engineering over pre-cutoff data
//!
//! Wide sources carry one column per assessment; the cutoff splits the
//! timeline into `available` and `target` columns and only the former feed
//! features. Event-level sources are filtered by timestamp before any
//! aggregation and re-checked afterwards.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::loader::EventStreams;
use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::preprocessing::stats;
use crate::profile::{
    AssessmentKind, Cutoff, FeatureThresholds, RelationalLayout, SourceLayout, SourceProfile, TargetSource, TimelineEntry,
};
use crate::types::{ActivityEvent, AssessmentEvent, TARGET_OUTCOME_COLUMN, TARGET_SCORE_COLUMN};

/// What the engine saw and what it withheld.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalAudit {
    pub cutoff: String,
    /// Last course day treated as available (event-level sources).
    pub cutoff_day: Option<f64>,
    pub available_assessments: Vec<String>,
    pub target_assessments: Vec<String>,
    pub events_used: usize,
    pub events_excluded: usize,
    pub activity_used: usize,
    pub activity_excluded: usize,
    /// Events caught by the post-aggregation check; non-zero means a defect upstream.
    pub refiltered_events: usize,
    pub max_timestamp_used: Option<f64>,
    pub features: Vec<String>,
}

#[derive(Debug)]
pub struct EngineOutput {
    pub table: Table,
    pub audit: TemporalAudit,
}

pub struct TemporalFeatureEngine<'a> {
    profile: &'a SourceProfile,
    cutoff: Cutoff,
}

impl<'a> TemporalFeatureEngine<'a> {
    pub fn new(profile: &'a SourceProfile, cutoff: Cutoff) -> Self {
        Self { profile, cutoff }
    }

    /// Splits the timeline into available and target entries, both by position.
    pub fn partition_timeline(&self) -> Result<(Vec<&'a TimelineEntry>, Vec<&'a TimelineEntry>)> {
        let timeline = self.profile.ordered_timeline();
        let (available, target): (Vec<_>, Vec<_>) = match &self.cutoff {
            Cutoff::Position(p) => timeline.into_iter().partition(|e| e.position <= *p),
            Cutoff::Assessments(names) => timeline
                .into_iter()
                .partition(|e| names.iter().any(|n| n == &e.column)),
            Cutoff::Week(_) => {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}: week cutoffs apply to event-level sources only",
                    self.profile.name
                )))
            }
        };
        if available.is_empty() {
            return Err(PipelineError::InsufficientAvailableData(format!(
                "{}: no assessments available at {}",
                self.profile.name, self.cutoff
            )));
        }
        Ok((available, target))
    }

    pub fn build(&self, table: Table, events: Option<&EventStreams>) -> Result<EngineOutput> {
        match (&self.profile.layout, events) {
            (SourceLayout::Relational(layout), Some(events)) => {
                self.build_event_level(table, events, layout)
            }
            (SourceLayout::Relational(_), None) => Err(PipelineError::schema(
                &self.profile.name,
                "event streams were not loaded",
            )),
            (SourceLayout::Stacked { .. }, _) => self.build_wide(table),
        }
    }

    // ---- wide sources ---------------------------------------------------

    fn build_wide(&self, mut table: Table) -> Result<EngineOutput> {
        let (available, target) = self.partition_timeline()?;
        let n = table.n_rows();
        let k = available.len();

        let mut scores = Array2::<f64>::from_elem((n, k), f64::NAN);
        for (j, entry) in available.iter().enumerate() {
            let column = table.numeric(&entry.column).ok_or_else(|| {
                PipelineError::schema(
                    &self.profile.name,
                    format!("assessment column {:?} missing or not numeric", entry.column),
                )
            })?;
            scores.column_mut(j).iter_mut().zip(column).for_each(|(dst, v)| *dst = *v);
        }

        if scores.iter().all(|v| v.is_nan()) {
            return Err(PipelineError::InsufficientAvailableData(format!(
                "{}: every available assessment is empty at {}",
                self.profile.name, self.cutoff
            )));
        }

        let target_score = self.wide_target(&table, &target)?;
        let thresholds = &self.profile.thresholds;

        // Per-row aggregates
        let mut avg = vec![0.0; n];
        let mut consistency = vec![0.0; n];
        let mut lo = vec![0.0; n];
        let mut hi = vec![0.0; n];
        let mut trend = vec![0.0; n];
        let mut improvement = vec![0.0; n];
        let mut improvement_rate = vec![0.0; n];
        for (i, row) in scores.axis_iter(Axis(0)).enumerate() {
            let values: Vec<f64> = row.to_vec();
            let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            avg[i] = if present.is_empty() { 0.0 } else { stats::mean(&present) };
            consistency[i] = stats::sample_std(&present);
            lo[i] = if present.is_empty() { 0.0 } else { stats::min(&present) };
            hi[i] = if present.is_empty() { 0.0 } else { stats::max(&present) };
            trend[i] = stats::ols_slope(&values);
            if present.len() >= 2 {
                improvement[i] = present[present.len() - 1] - present[0];
                improvement_rate[i] = improvement[i] / (present.len() - 1) as f64;
            }
        }

        // Batch percentile ranks of each available column
        let mut ranks = Array2::<f64>::from_elem((n, k), f64::NAN);
        for (j, column) in scores.axis_iter(Axis(1)).enumerate() {
            let r = stats::percentile_ranks(&column.to_vec());
            ranks.column_mut(j).iter_mut().zip(r).for_each(|(dst, v)| *dst = v);
        }
        let (avg_rank, rank_consistency): (Vec<f64>, Vec<f64>) = ranks
            .axis_iter(Axis(0))
            .map(|row| {
                let r = row.to_vec();
                let m = stats::mean(&r);
                (if m.is_nan() { 0.0 } else { m }, stats::sample_std(&r))
            })
            .unzip();

        let mut features: Vec<(String, Vec<f64>)> = vec![
            ("current_avg_score".into(), avg.clone()),
            ("performance_consistency".into(), consistency.clone()),
            ("score_min".into(), lo.clone()),
            ("score_max".into(), hi.clone()),
            ("score_volatility".into(), lo.iter().zip(&hi).map(|(a, b)| b - a).collect()),
            ("score_trend".into(), trend.clone()),
            ("overall_improvement".into(), improvement),
            ("improvement_rate".into(), improvement_rate),
            (
                "current_performance_level".into(),
                avg.iter().map(|a| a / thresholds.score_scale).collect(),
            ),
            ("avg_percentile_rank".into(), avg_rank),
            ("rank_consistency".into(), rank_consistency),
        ];
        features.extend(self.kind_features(&scores, &available));

        // Composite indicators against batch statistics of available aggregates
        let avg_median = stats::median(&avg);
        let avg_high = stats::quantile(&avg, thresholds.high_performer_quantile);
        let std_high = stats::quantile(&consistency, thresholds.high_performer_quantile);
        let std_low = stats::quantile(&consistency, thresholds.consistent_performer_quantile);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let performance_risk: Vec<f64> = avg.iter().map(|a| flag(*a < avg_median)).collect();
        let consistency_risk: Vec<f64> = consistency.iter().map(|s| flag(*s > std_high)).collect();
        let progression_risk: Vec<f64> = trend.iter().map(|t| flag(*t < 0.0)).collect();
        let [w_perf, w_cons, w_prog] = thresholds.risk_weights;
        let comprehensive: Vec<f64> = (0..n)
            .map(|i| w_perf * performance_risk[i] + w_cons * consistency_risk[i] + w_prog * progression_risk[i])
            .collect();
        let avg_mean = stats::mean(&avg);
        let avg_std = stats::population_std(&avg);

        features.extend([
            ("performance_risk".to_string(), performance_risk),
            ("consistency_risk".to_string(), consistency_risk),
            ("progression_risk".to_string(), progression_risk),
            ("comprehensive_risk_score".to_string(), comprehensive),
            ("high_performer".to_string(), avg.iter().map(|a| flag(*a >= avg_high)).collect()),
            (
                "consistent_performer".to_string(),
                consistency.iter().map(|s| flag(*s <= std_low)).collect(),
            ),
            ("improving_student".to_string(), trend.iter().map(|t| flag(*t > 0.0)).collect()),
            (
                "performance_zscore".to_string(),
                avg.iter()
                    .map(|a| if avg_std > 0.0 { (a - avg_mean) / avg_std } else { 0.0 })
                    .collect(),
            ),
            (
                "distance_from_passing".to_string(),
                avg.iter().map(|a| a - thresholds.passing_score).collect(),
            ),
        ]);

        let audit = TemporalAudit {
            cutoff: self.cutoff.to_string(),
            available_assessments: available.iter().map(|e| e.column.clone()).collect(),
            target_assessments: target.iter().map(|e| e.column.clone()).collect(),
            features: features.iter().map(|(name, _)| name.clone()).collect(),
            ..TemporalAudit::default()
        };
        tracing::info!(
            "{}: available {:?}, target {:?}",
            self.profile.name,
            audit.available_assessments,
            audit.target_assessments
        );

        self.drop_source_columns(&mut table);
        for (name, values) in features {
            table.set_numeric(name, values);
        }
        table.set_numeric(TARGET_SCORE_COLUMN, target_score);

        Ok(EngineOutput { table, audit })
    }

    fn wide_target(&self, table: &Table, target: &[&TimelineEntry]) -> Result<Vec<f64>> {
        match &self.profile.target {
            TargetSource::NextAssessment => {
                let next = target.first().ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "{}: no assessment left after {}",
                        self.profile.name, self.cutoff
                    ))
                })?;
                table.numeric(&next.column).map(<[f64]>::to_vec).ok_or_else(|| {
                    PipelineError::schema(&self.profile.name, format!("target column {:?} not numeric", next.column))
                })
            }
            TargetSource::Column { name, fallback_sum } => {
                if let Some(values) = table.numeric(name) {
                    return Ok(values.to_vec());
                }
                if !fallback_sum {
                    return Err(PipelineError::schema(
                        &self.profile.name,
                        format!("target column {:?} not found", name),
                    ));
                }
                tracing::info!("{}: {} absent, target is the sum of all assessments", self.profile.name, name);
                let mut total = vec![0.0; table.n_rows()];
                for entry in &self.profile.timeline {
                    if let Some(values) = table.numeric(&entry.column) {
                        for (t, v) in total.iter_mut().zip(values) {
                            if !v.is_nan() {
                                *t += v;
                            }
                        }
                    }
                }
                Ok(total)
            }
            TargetSource::Outcome { column } => Err(PipelineError::InvalidConfig(format!(
                "{}: categorical outcome {:?} on a wide source",
                self.profile.name, column
            ))),
        }
    }

    /// Per-kind performance, emitted only for kinds among the available columns.
    fn kind_features(&self, scores: &Array2<f64>, available: &[&TimelineEntry]) -> Vec<(String, Vec<f64>)> {
        let row_mean = |pred: &dyn Fn(AssessmentKind) -> bool| -> Option<Vec<f64>> {
            let cols: Vec<usize> = (0..available.len()).filter(|&j| pred(available[j].kind)).collect();
            if cols.is_empty() {
                return None;
            }
            Some(
                scores
                    .axis_iter(Axis(0))
                    .map(|row| {
                        let m = stats::mean(&cols.iter().map(|&j| row[j]).collect::<Vec<_>>());
                        if m.is_nan() { 0.0 } else { m }
                    })
                    .collect(),
            )
        };

        let mut out = Vec::new();
        if let Some(quiz) = row_mean(&|k| k == AssessmentKind::Quiz) {
            out.push(("quiz_performance".to_string(), quiz));
        }
        if let Some(assignment) = row_mean(&|k| k == AssessmentKind::Assignment) {
            let cols: Vec<usize> = (0..available.len())
                .filter(|&j| available[j].kind == AssessmentKind::Assignment)
                .collect();
            let consistency = scores
                .axis_iter(Axis(0))
                .map(|row| stats::sample_std(&cols.iter().map(|&j| row[j]).collect::<Vec<_>>()))
                .collect();
            out.push(("assignment_performance".to_string(), assignment));
            out.push(("assignment_consistency".to_string(), consistency));
        }
        if let Some(exam) = row_mean(&|k| k == AssessmentKind::Exam) {
            out.push(("exam_performance".to_string(), exam));
        }
        if let (Some(theory), Some(practical)) = (row_mean(&AssessmentKind::is_theory), row_mean(&AssessmentKind::is_practical)) {
            let gap: Vec<f64> = theory.iter().zip(&practical).map(|(t, p)| t - p).collect();
            let strength = gap.iter().map(|g| if *g > 0.0 { 1.0 } else { 0.0 }).collect();
            out.push(("theory_score".to_string(), theory));
            out.push(("practical_score".to_string(), practical));
            out.push(("theory_vs_practical".to_string(), gap));
            out.push(("theoretical_strength".to_string(), strength));
        }
        out
    }

    /// Removes raw timeline, outcome and target-source columns.
    fn drop_source_columns(&self, table: &mut Table) {
        let mut columns: Vec<&str> = self.profile.timeline.iter().map(|e| e.column.as_str()).collect();
        columns.extend(self.profile.outcome_columns.iter().map(String::as_str));
        match &self.profile.target {
            TargetSource::Column { name, .. } => columns.push(name),
            TargetSource::Outcome { column } => columns.push(column),
            TargetSource::NextAssessment => {}
        }
        let dropped = table.drop_columns(&columns);
        tracing::debug!("{}: dropped source columns {:?}", self.profile.name, dropped);
    }

    // ---- event-level sources --------------------------------------------

    fn build_event_level(&self, mut table: Table, events: &EventStreams, layout: &RelationalLayout) -> Result<EngineOutput> {
        let Cutoff::Week(week) = self.cutoff else {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: event-level sources need a week cutoff, got {}",
                self.profile.name, self.cutoff
            )));
        };
        let entity_column = self.profile.entity_column.as_deref().ok_or_else(|| {
            PipelineError::InvalidConfig(format!("{}: missing entity column", self.profile.name))
        })?;
        let TargetSource::Outcome { column: outcome_column } = &self.profile.target else {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: event-level sources need an outcome target",
                self.profile.name
            )));
        };
        let cutoff_day = week as f64 * layout.days_per_week;

        let (mut used, excluded): (Vec<&AssessmentEvent>, Vec<&AssessmentEvent>) =
            events.assessments.iter().partition(|e| assessment_available(e, cutoff_day));
        if used.is_empty() {
            return Err(PipelineError::InsufficientAvailableData(format!(
                "{}: no assessment submitted by day {}",
                self.profile.name, cutoff_day
            )));
        }
        let (mut clicks, clicks_excluded): (Vec<&ActivityEvent>, Vec<&ActivityEvent>) = events
            .activity
            .iter()
            .partition(|e| e.timestamp.map_or(false, |t| t <= cutoff_day));

        let mut assessment_agg = aggregate_assessments(&used);
        let mut activity_agg = aggregate_activity(&clicks, self.profile.thresholds.first_week_days);

        // Fail-safe: nothing contributing to an aggregate may be dated after the cutoff.
        let mut refiltered = 0;
        let latest = max_contributing(&assessment_agg, &activity_agg);
        if latest.map_or(false, |t| t > cutoff_day) {
            tracing::warn!(
                "{}: aggregate uses day {:?} beyond cutoff day {}, re-filtering",
                self.profile.name,
                latest,
                cutoff_day
            );
            let before = used.len() + clicks.len();
            used.retain(|e| e.timestamp.map_or(false, |t| t <= cutoff_day));
            clicks.retain(|e| e.timestamp.map_or(false, |t| t <= cutoff_day));
            refiltered = before - used.len() - clicks.len();
            assessment_agg = aggregate_assessments(&used);
            activity_agg = aggregate_activity(&clicks, self.profile.thresholds.first_week_days);
        }

        let mut available_ids: BTreeSet<String> = BTreeSet::new();
        available_ids.extend(used.iter().map(|e| e.assessment_id.clone()));
        let mut target_ids: BTreeSet<String> = excluded.iter().map(|e| e.assessment_id.clone()).collect();
        target_ids.retain(|id| !available_ids.contains(id));
        target_ids.insert(outcome_column.clone());

        let ids = table.keys(entity_column).ok_or_else(|| {
            PipelineError::schema(&self.profile.name, format!("entity column {:?} not found", entity_column))
        })?;
        let mut features = entity_assessment_features(&ids, &assessment_agg, &self.profile.thresholds);
        if layout.activity.is_some() {
            features.extend(entity_activity_features(&ids, &activity_agg));
        }

        let outcome = table.column(outcome_column).ok_or_else(|| {
            PipelineError::schema(&self.profile.name, format!("outcome column {:?} not found", outcome_column))
        })?;
        let outcome: Vec<Option<String>> = (0..table.n_rows()).map(|i| outcome.key(i)).collect();

        let audit = TemporalAudit {
            cutoff: self.cutoff.to_string(),
            cutoff_day: Some(cutoff_day),
            available_assessments: available_ids.into_iter().collect(),
            target_assessments: target_ids.into_iter().collect(),
            events_used: used.len(),
            events_excluded: excluded.len() + refiltered,
            activity_used: clicks.len(),
            activity_excluded: clicks_excluded.len(),
            refiltered_events: refiltered,
            max_timestamp_used: max_contributing(&assessment_agg, &activity_agg),
            features: features.iter().map(|(name, _)| name.clone()).collect(),
        };
        tracing::info!(
            "{}: cutoff day {} keeps {} assessment events ({} excluded) and {} activity events ({} excluded)",
            self.profile.name,
            cutoff_day,
            audit.events_used,
            audit.events_excluded,
            audit.activity_used,
            audit.activity_excluded
        );

        self.drop_source_columns(&mut table);
        for (name, values) in features {
            table.set_numeric(name, values);
        }
        table.set_text(TARGET_OUTCOME_COLUMN, outcome);

        Ok(EngineOutput { table, audit })
    }
}

/// An assessment counts when its date and, if known, its submission are on
/// or before the cutoff. Unknown dates count as future.
fn assessment_available(event: &AssessmentEvent, cutoff_day: f64) -> bool {
    let dated = event.timestamp.map_or(false, |t| t <= cutoff_day);
    let submitted = event.submitted.map_or(true, |s| s <= cutoff_day);
    dated && submitted
}

#[derive(Debug, Default)]
struct AssessmentAgg {
    /// (timestamp, score) of scored events
    scores: Vec<(f64, f64)>,
    weights: Vec<f64>,
    delays: Vec<f64>,
    banked: usize,
    by_kind: BTreeMap<String, Vec<f64>>,
    ranks: Vec<f64>,
    max_timestamp: f64,
}

fn aggregate_assessments(events: &[&AssessmentEvent]) -> BTreeMap<String, AssessmentAgg> {
    // Percentile rank of each score among available submissions of the same assessment
    let mut by_assessment: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, e) in events.iter().enumerate() {
        by_assessment.entry(e.assessment_id.as_str()).or_default().push(i);
    }
    let mut ranks = vec![f64::NAN; events.len()];
    for rows in by_assessment.values() {
        let scores: Vec<f64> = rows.iter().map(|&i| events[i].score.unwrap_or(f64::NAN)).collect();
        for (&i, r) in rows.iter().zip(stats::percentile_ranks(&scores)) {
            ranks[i] = r;
        }
    }

    let mut out: BTreeMap<String, AssessmentAgg> = BTreeMap::new();
    for (e, rank) in events.iter().zip(ranks) {
        let agg = out.entry(e.entity_id.clone()).or_insert_with(|| AssessmentAgg {
            max_timestamp: f64::NEG_INFINITY,
            ..AssessmentAgg::default()
        });
        let ts = e.timestamp.unwrap_or(f64::INFINITY);
        agg.max_timestamp = agg.max_timestamp.max(ts);
        agg.weights.push(e.weight);
        if e.banked {
            agg.banked += 1;
        }
        if let Some(submitted) = e.submitted {
            agg.delays.push(submitted - ts);
        }
        if let Some(score) = e.score {
            agg.scores.push((ts, score));
            if let Some(kind) = &e.kind {
                agg.by_kind.entry(feature_token(kind)).or_default().push(score);
            }
        }
        if !rank.is_nan() {
            agg.ranks.push(rank);
        }
    }
    out
}

#[derive(Debug, Default)]
struct ActivityAgg {
    clicks: Vec<f64>,
    days: Vec<f64>,
    first_week_clicks: f64,
    weekend_clicks: f64,
    by_type: BTreeMap<String, f64>,
    max_timestamp: f64,
}

fn aggregate_activity(events: &[&ActivityEvent], first_week_days: f64) -> BTreeMap<String, ActivityAgg> {
    let mut out: BTreeMap<String, ActivityAgg> = BTreeMap::new();
    for e in events {
        let agg = out.entry(e.entity_id.clone()).or_insert_with(|| ActivityAgg {
            max_timestamp: f64::NEG_INFINITY,
            ..ActivityAgg::default()
        });
        let day = e.timestamp.unwrap_or(f64::INFINITY);
        agg.max_timestamp = agg.max_timestamp.max(day);
        agg.clicks.push(e.clicks);
        agg.days.push(day);
        if (0.0..first_week_days).contains(&day) {
            agg.first_week_clicks += e.clicks;
        }
        if day.rem_euclid(7.0) >= 5.0 {
            agg.weekend_clicks += e.clicks;
        }
        if let Some(kind) = &e.activity_type {
            *agg.by_type.entry(feature_token(kind)).or_insert(0.0) += e.clicks;
        }
    }
    out
}

fn max_contributing(
    assessments: &BTreeMap<String, AssessmentAgg>,
    activity: &BTreeMap<String, ActivityAgg>,
) -> Option<f64> {
    assessments
        .values()
        .map(|a| a.max_timestamp)
        .chain(activity.values().map(|a| a.max_timestamp))
        .filter(|t| *t > f64::NEG_INFINITY)
        .reduce(f64::max)
}

fn feature_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// One value per table row; entities without events get zeros.
fn per_row<T>(ids: &[Option<String>], aggs: &BTreeMap<String, T>, f: impl Fn(&T) -> f64) -> Vec<f64> {
    ids.iter()
        .map(|id| id.as_ref().and_then(|id| aggs.get(id)).map_or(0.0, |a| or_zero(f(a))))
        .collect()
}

fn entity_assessment_features(
    ids: &[Option<String>],
    aggs: &BTreeMap<String, AssessmentAgg>,
    thresholds: &FeatureThresholds,
) -> Vec<(String, Vec<f64>)> {
    let scores = |a: &AssessmentAgg| a.scores.iter().map(|s| s.1).collect::<Vec<f64>>();

    let avg = per_row(ids, aggs, |a| stats::mean(&scores(a)));
    let mut features = vec![
        ("early_avg_score".to_string(), avg.clone()),
        ("early_score_std".to_string(), per_row(ids, aggs, |a| stats::sample_std(&scores(a)))),
        ("early_assessment_count".to_string(), per_row(ids, aggs, |a| a.weights.len() as f64)),
        ("early_min_score".to_string(), per_row(ids, aggs, |a| stats::min(&scores(a)))),
        ("early_max_score".to_string(), per_row(ids, aggs, |a| stats::max(&scores(a)))),
        ("early_avg_weight".to_string(), per_row(ids, aggs, |a| stats::mean(&a.weights))),
        ("early_total_weight".to_string(), per_row(ids, aggs, |a| a.weights.iter().sum())),
        ("early_banked_count".to_string(), per_row(ids, aggs, |a| a.banked as f64)),
        ("early_avg_submission_delay".to_string(), per_row(ids, aggs, |a| stats::mean(&a.delays))),
        ("early_submission_std".to_string(), per_row(ids, aggs, |a| stats::sample_std(&a.delays))),
    ];

    let kinds: BTreeSet<&String> = aggs.values().flat_map(|a| a.by_kind.keys()).collect();
    for kind in kinds {
        features.push((
            format!("early_{}_score", kind),
            per_row(ids, aggs, |a| a.by_kind.get(kind).map_or(0.0, |s| stats::mean(s))),
        ));
    }

    features.push((
        "early_score_trend".to_string(),
        per_row(ids, aggs, |a| {
            let mut points = a.scores.clone();
            points.sort_by(|x, y| x.0.total_cmp(&y.0));
            stats::ols_slope_xy(&points)
        }),
    ));
    features.push(("avg_percentile_rank".to_string(), per_row(ids, aggs, |a| stats::mean(&a.ranks))));

    let median = stats::median(&avg);
    let high = stats::quantile(&avg, thresholds.high_performer_quantile);
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    features.push(("performance_risk".to_string(), avg.iter().map(|a| flag(*a < median)).collect()));
    features.push(("high_performer".to_string(), avg.iter().map(|a| flag(*a >= high)).collect()));
    features.push((
        "early_low_performance_flag".to_string(),
        avg.iter().map(|a| flag(*a < thresholds.low_performance_score)).collect(),
    ));
    features
}

/// Base columns are always emitted; entities without activity get zeros.
fn entity_activity_features(ids: &[Option<String>], aggs: &BTreeMap<String, ActivityAgg>) -> Vec<(String, Vec<f64>)> {
    let total = |a: &ActivityAgg| a.clicks.iter().sum::<f64>();
    let first = |a: &ActivityAgg| stats::min(&a.days);
    let last = |a: &ActivityAgg| stats::max(&a.days);
    let types: BTreeSet<&String> = aggs.values().flat_map(|a| a.by_type.keys()).collect();
    let n_types = types.len().max(1) as f64;

    let mut features = vec![
        ("early_total_clicks".to_string(), per_row(ids, aggs, total)),
        ("early_avg_clicks".to_string(), per_row(ids, aggs, |a| stats::mean(&a.clicks))),
        ("early_clicks_std".to_string(), per_row(ids, aggs, |a| stats::sample_std(&a.clicks))),
        ("early_activity_count".to_string(), per_row(ids, aggs, |a| a.clicks.len() as f64)),
        ("early_unique_activities".to_string(), per_row(ids, aggs, |a| a.by_type.len() as f64)),
        ("early_first_activity_day".to_string(), per_row(ids, aggs, first)),
        ("early_last_activity_day".to_string(), per_row(ids, aggs, last)),
        ("early_activity_span".to_string(), per_row(ids, aggs, |a| last(a) - first(a))),
        (
            "early_activity_density".to_string(),
            per_row(ids, aggs, |a| a.clicks.len() as f64 / (last(a) - first(a) + 1.0)),
        ),
        ("first_week_clicks".to_string(), per_row(ids, aggs, |a| a.first_week_clicks)),
        ("first_week_ratio".to_string(), per_row(ids, aggs, |a| a.first_week_clicks / total(a))),
        ("early_weekend_ratio".to_string(), per_row(ids, aggs, |a| a.weekend_clicks / total(a))),
        (
            "early_diversity_score".to_string(),
            per_row(ids, aggs, |a| a.by_type.len() as f64 / n_types),
        ),
    ];
    for kind in types {
        features.push((
            format!("early_pref_{}", kind),
            per_row(ids, aggs, |a| a.by_type.get(kind).copied().unwrap_or(0.0) / total(a)),
        ));
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Column;

    fn ai_table(rows: &[[f64; 8]]) -> Table {
        let profile = SourceProfile::ai();
        let mut columns: Vec<(String, Column)> = profile
            .ordered_timeline()
            .iter()
            .enumerate()
            .map(|(j, e)| (e.column.clone(), Column::Numeric(rows.iter().map(|r| r[j]).collect())))
            .collect();
        columns.push((
            "Total".to_string(),
            Column::Numeric(rows.iter().map(|r| r.iter().sum()).collect()),
        ));
        columns.push((
            "Gender".to_string(),
            Column::Text(rows.iter().map(|_| Some("F".to_string())).collect()),
        ));
        Table::from_columns(columns).unwrap()
    }

    #[test]
    fn test_midterm_features_ignore_future_columns() {
        let profile = SourceProfile::ai();
        let cutoff = profile.resolve_cutoff("midterm").unwrap();
        let engine = TemporalFeatureEngine::new(&profile, cutoff);

        let rows = [[8.0, 9.0, 20.0, 5.0, 6.0, 10.0, 4.0, 30.0], [4.0, 6.0, 12.0, 7.0, 8.0, 9.0, 5.0, 20.0]];
        let base = engine.build(ai_table(&rows), None).unwrap();

        let mut perturbed_rows = rows;
        perturbed_rows[0][7] = 1.0;
        perturbed_rows[1][4] = 0.0;
        let mut perturbed = engine.build(ai_table(&perturbed_rows), None).unwrap();
        perturbed.table.drop_column(TARGET_SCORE_COLUMN);
        let mut base_table = base.table.clone();
        base_table.drop_column(TARGET_SCORE_COLUMN);
        assert_eq!(base_table, perturbed.table);

        assert_eq!(base.audit.available_assessments, vec!["Quiz ", "Assignment_1", "Midterm"]);
        assert!(!base.table.contains("Midterm"));
        assert!(!base.table.contains("Total"));
        assert!(base.table.contains("Gender"));
        assert_eq!(base.table.numeric("current_avg_score").unwrap()[0], 37.0 / 3.0);
        assert!(base.table.contains("theory_vs_practical"));
        assert_eq!(base.table.numeric(TARGET_SCORE_COLUMN).unwrap()[0], 92.0);
    }

    #[test]
    fn test_single_available_assessment_gives_zero_spread() {
        let profile = SourceProfile::ai();
        let engine = TemporalFeatureEngine::new(&profile, profile.resolve_cutoff("early").unwrap());
        let out = engine
            .build(ai_table(&[[8.0; 8], [3.0; 8], [5.0; 8]]), None)
            .unwrap();

        for name in ["performance_consistency", "score_trend", "improvement_rate", "rank_consistency"] {
            assert!(out.table.numeric(name).unwrap().iter().all(|v| *v == 0.0), "{}", name);
        }
        assert!(out.table.contains("quiz_performance"));
        assert!(!out.table.contains("assignment_performance"));
    }

    #[test]
    fn test_empty_cutoff_fails_fast() {
        let profile = SourceProfile::ai();
        let engine = TemporalFeatureEngine::new(&profile, Cutoff::Position(0));
        let err = engine.build(ai_table(&[[1.0; 8]]), None).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientAvailableData(_)));
    }

    #[test]
    fn test_total_falls_back_to_sum() {
        let profile = SourceProfile::ai();
        let engine = TemporalFeatureEngine::new(&profile, Cutoff::Position(3));
        let mut table = ai_table(&[[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]]);
        table.drop_column("Total");
        let out = engine.build(table, None).unwrap();
        assert_eq!(out.table.numeric(TARGET_SCORE_COLUMN).unwrap(), &[36.0]);
    }

    fn submission(entity: &str, assessment: &str, day: Option<f64>, score: f64) -> AssessmentEvent {
        AssessmentEvent {
            entity_id: entity.to_string(),
            assessment_id: assessment.to_string(),
            timestamp: day,
            score: Some(score),
            weight: 10.0,
            kind: Some("TMA".to_string()),
            submitted: day,
            banked: false,
        }
    }

    fn ou_entities() -> Table {
        Table::from_columns(vec![
            ("id_student", Column::Numeric(vec![1.0, 2.0, 3.0])),
            ("gender", Column::Text(vec![Some("M".into()), Some("F".into()), Some("F".into())])),
            (
                "final_result",
                Column::Text(vec![Some("Pass".into()), Some("Fail".into()), Some("Distinction".into())]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_event_level_filters_future_events() {
        let profile = SourceProfile::ou();
        let engine = TemporalFeatureEngine::new(&profile, Cutoff::Week(2));
        let streams = |late_score: f64| EventStreams {
            assessments: vec![
                submission("1", "a1", Some(10.0), 60.0),
                submission("2", "a1", Some(10.0), 40.0),
                submission("1", "a2", Some(30.0), late_score),
                submission("2", "a3", None, late_score),
            ],
            activity: vec![ActivityEvent {
                entity_id: "1".into(),
                timestamp: Some(3.0),
                clicks: 5.0,
                activity_type: Some("forumng".into()),
            }],
        };

        let out = engine.build(ou_entities(), Some(&streams(90.0))).unwrap();
        let other = engine.build(ou_entities(), Some(&streams(5.0))).unwrap();
        assert_eq!(out.table, other.table);

        assert_eq!(out.audit.events_used, 2);
        assert_eq!(out.audit.events_excluded, 2);
        assert_eq!(out.audit.max_timestamp_used, Some(10.0));
        assert_eq!(out.audit.refiltered_events, 0);
        assert_eq!(out.table.numeric("early_avg_score").unwrap(), &[60.0, 40.0, 0.0]);
        assert_eq!(out.table.numeric("early_tma_score").unwrap()[0], 60.0);
        assert_eq!(out.table.numeric("early_pref_forumng").unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(out.table.numeric("avg_percentile_rank").unwrap(), &[1.0, 0.5, 0.0]);
        assert!(!out.table.contains("final_result"));
        assert_eq!(out.table.text(TARGET_OUTCOME_COLUMN).unwrap()[2].as_deref(), Some("Distinction"));
    }

    #[test]
    fn test_event_level_without_available_events_fails() {
        let profile = SourceProfile::ou();
        let engine = TemporalFeatureEngine::new(&profile, Cutoff::Week(1));
        let streams = EventStreams {
            assessments: vec![submission("1", "a1", Some(30.0), 60.0)],
            activity: Vec::new(),
        };
        let err = engine.build(ou_entities(), Some(&streams)).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientAvailableData(_)));
    }

    #[test]
    fn test_activity_columns_survive_a_cutoff_before_any_click() {
        let profile = SourceProfile::ou();
        let engine = TemporalFeatureEngine::new(&profile, Cutoff::Week(2));
        let streams = EventStreams {
            assessments: vec![submission("1", "a1", Some(10.0), 60.0)],
            activity: vec![ActivityEvent {
                entity_id: "1".into(),
                timestamp: Some(40.0),
                clicks: 5.0,
                activity_type: Some("forumng".into()),
            }],
        };

        let out = engine.build(ou_entities(), Some(&streams)).unwrap();

        assert_eq!(out.audit.activity_used, 0);
        for name in ["early_total_clicks", "early_activity_count", "first_week_ratio", "early_diversity_score"] {
            assert_eq!(out.table.numeric(name).unwrap(), &[0.0, 0.0, 0.0], "{}", name);
        }
        assert!(!out.table.contains("early_pref_forumng"));
    }
}
