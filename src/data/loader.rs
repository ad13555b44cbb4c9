//! RecordLoader: reads and joins the raw files of one source

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::data::table::{Column, Table};
use crate::error::{PipelineError, Result};
use crate::profile::{
    ActivityStreamSpec, AssessmentStreamSpec, RegistrationSpec, RelationalLayout, SourceLayout,
    SourceProfile, StackedFile,
};
use crate::types::{ActivityEvent, AssessmentEvent};

/// Everything loaded for one source.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// One row per entity (wide sources) or per entity enrolment (relational).
    pub entities: Table,
    /// Timestamped events of relational sources.
    pub events: Option<EventStreams>,
}

#[derive(Debug, Clone, Default)]
pub struct EventStreams {
    pub assessments: Vec<AssessmentEvent>,
    pub activity: Vec<ActivityEvent>,
}

pub struct RecordLoader<'a> {
    profile: &'a SourceProfile,
    data_dir: PathBuf,
}

impl<'a> RecordLoader<'a> {
    pub fn new(profile: &'a SourceProfile, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            data_dir: data_dir.into(),
        }
    }

    pub fn load(&self) -> Result<SourceFrame> {
        let frame = match &self.profile.layout {
            SourceLayout::Stacked { files, delimiter } => SourceFrame {
                entities: self.load_stacked(files, *delimiter)?,
                events: None,
            },
            SourceLayout::Relational(layout) => self.load_relational(layout)?,
        };
        tracing::info!(
            "{}: loaded {} rows x {} columns",
            self.profile.name,
            frame.entities.n_rows(),
            frame.entities.n_cols()
        );
        if let Some(events) = &frame.events {
            tracing::info!(
                "{}: loaded {} assessment events, {} activity events",
                self.profile.name,
                events.assessments.len(),
                events.activity.len()
            );
        }
        Ok(frame)
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }

    fn delimiter(&self, delimiter: char) -> Result<u8> {
        u8::try_from(delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "{}: delimiter {:?} is not a single ASCII byte",
                    self.profile.name, delimiter
                ))
            })
    }

    fn load_stacked(&self, files: &[StackedFile], delimiter: char) -> Result<Table> {
        if files.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: no input files declared",
                self.profile.name
            )));
        }
        let delimiter = self.delimiter(delimiter)?;

        let mut parts = Vec::with_capacity(files.len());
        for file in files {
            let mut table = Table::read_csv(self.path(&file.path), delimiter)?;
            for (tag, value) in &file.tags {
                table.set_text(tag.as_str(), vec![Some(value.clone()); table.n_rows()]);
            }
            tracing::debug!("{}: {} -> {} rows", self.profile.name, file.path, table.n_rows());
            parts.push(table);
        }
        let table = Table::vstack(parts)
            .map_err(|e| PipelineError::schema(&self.profile.name, e.to_string()))?;

        for entry in &self.profile.timeline {
            match table.column(&entry.column) {
                Some(Column::Numeric(_)) => {}
                Some(Column::Text(_)) => {
                    return Err(PipelineError::schema(
                        &self.profile.name,
                        format!("assessment column {:?} is not numeric", entry.column),
                    ))
                }
                None => {
                    return Err(PipelineError::schema(
                        &self.profile.name,
                        format!("assessment column {:?} not found", entry.column),
                    ))
                }
            }
        }
        Ok(table)
    }

    fn load_relational(&self, layout: &RelationalLayout) -> Result<SourceFrame> {
        let entity_column = self.profile.entity_column.as_deref().ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "{}: relational layout requires an entity column",
                self.profile.name
            ))
        })?;

        let raw = Table::read_csv(self.path(&layout.entity_file), b',')?;
        self.require_columns(&raw, &layout.entity_file, &layout.entity_columns)?;
        self.require_columns(&raw, &layout.entity_file, &[entity_column])?;
        let mut entities = raw.select_columns(&layout.entity_columns)?;

        if let Some(registration) = &layout.registration {
            entities = self.join_registration(entities, entity_column, registration)?;
        }

        let assessments = self.load_assessments(entity_column, &layout.assessments)?;
        let activity = match &layout.activity {
            Some(spec) => self.load_activity(entity_column, spec)?,
            None => Vec::new(),
        };

        Ok(SourceFrame {
            entities,
            events: Some(EventStreams {
                assessments,
                activity,
            }),
        })
    }

    fn require_columns<S: AsRef<str>>(&self, table: &Table, file: &str, columns: &[S]) -> Result<()> {
        for column in columns {
            if !table.contains(column.as_ref()) {
                return Err(PipelineError::schema(
                    &self.profile.name,
                    format!("{}: column {:?} not found", file, column.as_ref()),
                ));
            }
        }
        Ok(())
    }

    /// Earliest registration day per entity. Unregistration is never read.
    fn join_registration(
        &self,
        entities: Table,
        entity_column: &str,
        spec: &RegistrationSpec,
    ) -> Result<Table> {
        let table = Table::read_csv(self.path(&spec.file), b',')?;
        self.require_columns(&table, &spec.file, &[entity_column, spec.date_column.as_str()])?;
        let ids = table.keys(entity_column).unwrap_or_default();
        let dates = numeric_or_nan(&table, &spec.date_column);

        let mut earliest: BTreeMap<String, f64> = BTreeMap::new();
        for (id, date) in ids.into_iter().zip(dates) {
            let (Some(id), false) = (id, date.is_nan()) else {
                continue;
            };
            earliest
                .entry(id)
                .and_modify(|d| *d = d.min(date))
                .or_insert(date);
        }

        let (keys, values): (Vec<_>, Vec<_>) = earliest.into_iter().map(|(k, v)| (Some(k), v)).unzip();
        let reduced = Table::from_columns(vec![
            (entity_column.to_string(), Column::Text(keys)),
            (spec.feature.clone(), Column::Numeric(values)),
        ])?;
        entities.left_join(&reduced, entity_column)
    }

    fn load_assessments(
        &self,
        entity_column: &str,
        spec: &AssessmentStreamSpec,
    ) -> Result<Vec<AssessmentEvent>> {
        let events = Table::read_csv(self.path(&spec.events_file), b',')?;
        let metadata = Table::read_csv(self.path(&spec.metadata_file), b',')?;
        self.require_columns(&events, &spec.events_file, &[entity_column, spec.join_key.as_str()])?;
        self.require_columns(&metadata, &spec.metadata_file, &[spec.join_key.as_str()])?;

        let joined = Joined::new(&events, &metadata, &spec.join_key);
        let mut declared = vec![&spec.timestamp_column, &spec.score_column];
        declared.extend(
            [&spec.weight_column, &spec.type_column, &spec.submitted_column, &spec.banked_column]
                .into_iter()
                .flatten(),
        );
        for column in declared {
            if !joined.has(column) {
                return Err(PipelineError::schema(
                    &self.profile.name,
                    format!("assessment column {:?} not found", column),
                ));
            }
        }

        let entity_ids = events.keys(entity_column).unwrap_or_default();
        let assessment_ids = events.keys(&spec.join_key).unwrap_or_default();
        let mut out = Vec::with_capacity(events.n_rows());
        let mut unmatched = 0usize;
        for row in 0..events.n_rows() {
            let Some(entity_id) = entity_ids[row].clone() else {
                continue;
            };
            if joined.meta_row(row).is_none() {
                unmatched += 1;
            }
            out.push(AssessmentEvent {
                entity_id,
                assessment_id: assessment_ids[row].clone().unwrap_or_default(),
                timestamp: joined.number(row, &spec.timestamp_column),
                score: joined.number(row, &spec.score_column),
                weight: spec
                    .weight_column
                    .as_ref()
                    .and_then(|c| joined.number(row, c))
                    .unwrap_or(0.0),
                kind: spec.type_column.as_ref().and_then(|c| joined.text(row, c)),
                submitted: spec.submitted_column.as_ref().and_then(|c| joined.number(row, c)),
                banked: spec
                    .banked_column
                    .as_ref()
                    .and_then(|c| joined.number(row, c))
                    .map_or(false, |v| v != 0.0),
            });
        }
        if unmatched > 0 {
            tracing::warn!(
                "{}: {} assessment events have no metadata row; their dates are unknown",
                self.profile.name,
                unmatched
            );
        }
        Ok(out)
    }

    fn load_activity(&self, entity_column: &str, spec: &ActivityStreamSpec) -> Result<Vec<ActivityEvent>> {
        let events = Table::read_csv(self.path(&spec.events_file), b',')?;
        let metadata = Table::read_csv(self.path(&spec.metadata_file), b',')?;
        self.require_columns(&events, &spec.events_file, &[entity_column, spec.join_key.as_str()])?;
        self.require_columns(&metadata, &spec.metadata_file, &[spec.join_key.as_str()])?;

        let joined = Joined::new(&events, &metadata, &spec.join_key);
        for column in [Some(&spec.timestamp_column), Some(&spec.clicks_column), spec.type_column.as_ref()]
            .into_iter()
            .flatten()
        {
            if !joined.has(column) {
                return Err(PipelineError::schema(
                    &self.profile.name,
                    format!("activity column {:?} not found", column),
                ));
            }
        }

        let entity_ids = events.keys(entity_column).unwrap_or_default();
        Ok((0..events.n_rows())
            .filter_map(|row| {
                let entity_id = entity_ids[row].clone()?;
                Some(ActivityEvent {
                    entity_id,
                    timestamp: joined.number(row, &spec.timestamp_column),
                    clicks: joined.number(row, &spec.clicks_column).unwrap_or(0.0),
                    activity_type: spec.type_column.as_ref().and_then(|c| joined.text(row, c)),
                })
            })
            .collect())
    }
}

/// Event rows looked up against their metadata table by a join key.
/// Columns are resolved on the event table first, then on the metadata.
struct Joined<'t> {
    events: &'t Table,
    metadata: &'t Table,
    rows: Vec<Option<usize>>,
}

impl<'t> Joined<'t> {
    fn new(events: &'t Table, metadata: &'t Table, key: &str) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (row, k) in metadata.keys(key).unwrap_or_default().into_iter().enumerate() {
            if let Some(k) = k {
                index.entry(k).or_insert(row);
            }
        }
        let rows = events
            .keys(key)
            .unwrap_or_default()
            .into_iter()
            .map(|k| k.and_then(|k| index.get(&k).copied()))
            .collect();
        Self {
            events,
            metadata,
            rows,
        }
    }

    fn has(&self, column: &str) -> bool {
        self.events.contains(column) || self.metadata.contains(column)
    }

    fn meta_row(&self, row: usize) -> Option<usize> {
        self.rows[row]
    }

    fn cell(&self, row: usize, column: &str) -> Option<(&'t Column, usize)> {
        if let Some(c) = self.events.column(column) {
            return Some((c, row));
        }
        let c = self.metadata.column(column)?;
        Some((c, self.rows[row]?))
    }

    fn number(&self, row: usize, column: &str) -> Option<f64> {
        let (c, i) = self.cell(row, column)?;
        c.as_numeric().map(|v| v[i]).filter(|v| !v.is_nan())
    }

    fn text(&self, row: usize, column: &str) -> Option<String> {
        let (c, i) = self.cell(row, column)?;
        c.key(i)
    }
}

fn numeric_or_nan(table: &Table, column: &str) -> Vec<f64> {
    table
        .numeric(column)
        .map(<[f64]>::to_vec)
        .unwrap_or_else(|| vec![f64::NAN; table.n_rows()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SourceProfile;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_stacked_files_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let header = "sex;age;G1;G2;G3\n";
        write(dir.path(), "uci_data/student-mat.csv", &format!("{}F;15;10;11;12\n", header));
        write(dir.path(), "uci_data/student-por.csv", &format!("{}M;16;8;9;9\nF;17;14;15;16\n", header));

        let profile = SourceProfile::uci();
        let frame = RecordLoader::new(&profile, dir.path()).load().unwrap();

        assert_eq!(frame.entities.n_rows(), 3);
        assert!(frame.events.is_none());
        let subject = frame.entities.text("subject").unwrap();
        assert_eq!(subject[0].as_deref(), Some("math"));
        assert_eq!(subject[2].as_deref(), Some("portuguese"));
    }

    #[test]
    fn test_missing_file_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let profile = SourceProfile::uci();
        let err = RecordLoader::new(&profile, dir.path()).load().unwrap_err();
        assert!(matches!(err, PipelineError::MissingSourceFile { .. }));

        write(dir.path(), "uci_data/student-mat.csv", "sex;G1;G2\nF;1;2\n");
        write(dir.path(), "uci_data/student-por.csv", "sex;G1;G2\nM;3;4\n");
        let err = RecordLoader::new(&profile, dir.path()).load().unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[test]
    fn test_relational_joins_metadata_and_registration() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "ou_data/studentInfo.csv",
            "id_student,gender,region,highest_education,age_band,disability,final_result,date_unregistration\n\
             1,M,East,A Level,0-35,N,Pass,\n\
             2,F,West,HE,35-55,N,Fail,30\n",
        );
        write(
            dir.path(),
            "ou_data/studentRegistration.csv",
            "id_student,date_registration,date_unregistration\n1,-20,\n1,-35,\n2,-5,30\n",
        );
        write(
            dir.path(),
            "ou_data/assessments.csv",
            "id_assessment,assessment_type,date,weight\n100,TMA,19,10\n101,CMA,,0\n",
        );
        write(
            dir.path(),
            "ou_data/studentAssessment.csv",
            "id_assessment,id_student,date_submitted,is_banked,score\n100,1,18,0,70\n101,2,40,1,55\n999,2,5,0,60\n",
        );
        write(dir.path(), "ou_data/vle.csv", "id_site,activity_type\n5,forumng\n");
        write(
            dir.path(),
            "ou_data/studentVle.csv",
            "id_student,id_site,date,sum_click\n1,5,3,4\n2,6,10,2\n",
        );

        let profile = SourceProfile::ou();
        let frame = RecordLoader::new(&profile, dir.path()).load().unwrap();

        assert!(!frame.entities.contains("date_unregistration"));
        assert_eq!(frame.entities.numeric("enrollment_date").unwrap(), &[-35.0, -5.0]);

        let events = frame.events.unwrap();
        assert_eq!(events.assessments.len(), 3);
        assert_eq!(events.assessments[0].timestamp, Some(19.0));
        assert_eq!(events.assessments[0].kind.as_deref(), Some("TMA"));
        assert_eq!(events.assessments[1].timestamp, None);
        assert!(events.assessments[1].banked);
        assert_eq!(events.assessments[2].timestamp, None);

        assert_eq!(events.activity.len(), 2);
        assert_eq!(events.activity[0].activity_type.as_deref(), Some("forumng"));
        assert_eq!(events.activity[1].activity_type, None);
        assert_eq!(events.activity[1].timestamp, Some(10.0));
    }
}
