use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use weakness_ml::data::table::{Column, Table};
use weakness_ml::output::{load_preprocessor, persist};
use weakness_ml::preprocessing::{SplitStrategy, Splitter};
use weakness_ml::{Partition, PipelineConfig, PreprocessingPipeline, SourceProfile, WeaknessLevel, LABEL_COLUMN};

const AI_FILE: &str = "ai_course_data/Student Performance Dataset in AI course/Stu_Performance_dataset.csv";

fn config(root: &Path, seed: u64) -> PipelineConfig {
    PipelineConfig {
        data_dir: root.join("data"),
        output_dir: root.join("processed_data"),
        reports_dir: root.join("reports"),
        seed,
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join("data").join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// 100 AI course rows. `future` shifts every assessment after the midterm.
fn ai_csv(future: f64) -> String {
    ai_csv_with_hours(future, |i| Some(((i * 13) % 20) as f64))
}

/// Total score of AI course row `i`.
fn ai_total(i: u32) -> f64 {
    40.0 + ((i * 37) % 50) as f64
}

fn ai_csv_with_hours(future: f64, hours: impl Fn(u32) -> Option<f64>) -> String {
    let weights = [0.05, 0.10, 0.15, 0.10, 0.10, 0.15, 0.05, 0.30];
    let mut csv = String::from(
        "Gender,Study_Hours,Quiz ,Assignment_1,Midterm,Assignment_2,Assignment_3,Project,Presentation,Final_Exam,Total,Grade,Categories,Total_percentile\n",
    );
    for i in 0..100u32 {
        let total = ai_total(i);
        let parts: Vec<f64> = weights
            .iter()
            .enumerate()
            .map(|(k, w)| if k >= 3 { total * w + future } else { total * w })
            .collect();
        let grade = if total >= 75.0 { "A" } else if total >= 60.0 { "B" } else { "F" };
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            if i % 2 == 0 { "M" } else { "F" },
            hours(i).map(|h| h.to_string()).unwrap_or_default(),
            parts[0],
            parts[1],
            parts[2],
            parts[3],
            parts[4],
            parts[5],
            parts[6],
            parts[7],
            total,
            grade,
            grade,
            i as f64 / 100.0
        ));
    }
    csv
}

fn uci_csv(offset: u32, rows: u32) -> String {
    let jobs = ["at_home", "health", "other", "services", "teacher"];
    let mut csv = String::from(
        "school;sex;age;Mjob;Medu;Fedu;traveltime;studytime;failures;schoolsup;famsup;paid;higher;internet;famrel;freetime;goout;Dalc;Walc;health;absences;G1;G2;G3\n",
    );
    for r in 0..rows {
        let i = offset + r;
        let g2 = (i * 7) % 20;
        csv.push_str(&format!(
            "{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{};{}\n",
            if i % 3 == 0 { "MS" } else { "GP" },
            if i % 2 == 0 { "F" } else { "M" },
            15 + i % 7,
            jobs[(i % 5) as usize],
            i % 5,
            (i + 2) % 5,
            1 + i % 4,
            1 + (i * 3) % 4,
            if i % 9 == 0 { 1 } else { 0 },
            if i % 4 == 0 { "yes" } else { "no" },
            if i % 2 == 0 { "yes" } else { "no" },
            if i % 5 == 0 { "yes" } else { "no" },
            if i % 10 == 0 { "no" } else { "yes" },
            if i % 6 == 0 { "no" } else { "yes" },
            1 + i % 5,
            1 + (i * 2) % 5,
            1 + (i * 3) % 5,
            1 + i % 5,
            1 + (i * 4) % 5,
            1 + (i * 7) % 5,
            (i * 11) % 30,
            (g2 + i % 3).min(20),
            g2,
            (g2 + 1).min(20)
        ));
    }
    csv
}

fn write_ou(root: &Path) {
    write_ou_with_copies(root, |id| if id == 1 { 2 } else { 1 });
}

/// OU fixture with `copies(id)` studentInfo rows per student.
fn write_ou_with_copies(root: &Path, copies: impl Fn(u32) -> usize) {
    let outcomes = ["Distinction", "Pass", "Fail", "Withdrawn"];
    let mut info = String::from("code_module,id_student,gender,region,highest_education,age_band,disability,final_result\n");
    let mut registration = String::from("id_student,date_registration,date_unregistration\n");
    let mut submissions = String::from("id_assessment,id_student,date_submitted,is_banked,score\n");
    let mut clicks = String::from("id_student,id_site,date,sum_click\n");
    for id in 1..=30u32 {
        let row = format!(
            "AAA,{},{},{},{},{},{},{}\n",
            id,
            if id % 2 == 0 { "M" } else { "F" },
            if id % 3 == 0 { "Scotland" } else { "Wales" },
            if id % 4 == 0 { "HE Qualification" } else { "A Level or Equivalent" },
            if id % 5 == 0 { "35-55" } else { "0-35" },
            if id % 7 == 0 { "Y" } else { "N" },
            outcomes[(id % 4) as usize]
        );
        info.push_str(&row.repeat(copies(id)));
        registration.push_str(&format!("{},{},{}\n", id, -((id * 3) as i64), if id % 4 == 3 { "40" } else { "" }));

        let base = 40 + (id * 17) % 60;
        submissions.push_str(&format!("1,{},{},0,{}\n", id, 18 + id % 3, base));
        submissions.push_str(&format!("2,{},{},{},{}\n", id, 45 + id % 5, u32::from(id % 6 == 0), (base + 5).min(100)));
        submissions.push_str(&format!("3,{},{},0,{}\n", id, 210, (base * 2) % 100));
        clicks.push_str(&format!("{},10,{},{}\n", id, id % 7, 1 + id % 4));
        clicks.push_str(&format!("{},11,{},{}\n", id, 30 + id % 10, 2 + id % 5));
        clicks.push_str(&format!("{},10,{},{}\n", id, 120, 50));
    }

    write(root, "ou_data/studentInfo.csv", &info);
    write(root, "ou_data/studentRegistration.csv", &registration);
    write(
        root,
        "ou_data/assessments.csv",
        "code_module,id_assessment,assessment_type,date,weight\nAAA,1,TMA,20,10\nAAA,2,TMA,50,20\nAAA,3,Exam,200,100\n",
    );
    write(root, "ou_data/studentAssessment.csv", &submissions);
    write(root, "ou_data/vle.csv", "id_site,activity_type\n10,resource\n11,forumng\n");
    write(root, "ou_data/studentVle.csv", &clicks);
}

fn column_set(table: &Table) -> BTreeSet<String> {
    table.names().iter().cloned().collect()
}

#[test]
fn test_ai_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), AI_FILE, &ai_csv(0.0));

    let pipeline = PreprocessingPipeline::new(SourceProfile::ai(), config(dir.path(), 42)).unwrap();
    let outcome = pipeline.run().unwrap();

    assert_eq!(outcome.train.n_rows(), 80);
    assert_eq!(outcome.test.n_rows(), 20);
    assert_eq!(column_set(&outcome.train), column_set(&outcome.test));

    let names = column_set(&outcome.train);
    for forbidden in [
        "Total",
        "Grade",
        "Categories",
        "Assignment_2",
        "Final_Exam",
        "Quiz ",
        "Total_percentile",
        "target_score",
    ] {
        assert!(!names.contains(forbidden), "{} leaked into features", forbidden);
    }
    assert_eq!(outcome.train.names().iter().filter(|n| *n == LABEL_COLUMN).count(), 1);
    assert!(names.contains("Gender"));
    assert!(names.contains("current_avg_score"));
    assert!(outcome.report.leakage.emergency_removals.contains(&"Total_percentile".to_string()));

    let labels = outcome.train.numeric(LABEL_COLUMN).unwrap();
    let distinct: BTreeSet<u8> = labels.iter().map(|&v| v as u8).collect();
    assert_eq!(distinct, BTreeSet::from([0, 1, 2]));

    let hours = outcome.train.numeric("Study_Hours").unwrap();
    let mean = hours.iter().sum::<f64>() / hours.len() as f64;
    assert!(mean.abs() < 1e-9);
    assert_eq!(outcome.report.features_after, outcome.preprocessor.feature_columns());
}

#[test]
fn test_future_assessments_do_not_change_outputs() {
    let base_dir = tempfile::tempdir().unwrap();
    let shifted_dir = tempfile::tempdir().unwrap();
    write(base_dir.path(), AI_FILE, &ai_csv(0.0));
    write(shifted_dir.path(), AI_FILE, &ai_csv(7.5));

    let run = |root: &Path| {
        PreprocessingPipeline::new(SourceProfile::ai(), config(root, 42))
            .unwrap()
            .run()
            .unwrap()
    };
    let base = run(base_dir.path());
    let shifted = run(shifted_dir.path());

    assert_eq!(base.train, shifted.train);
    assert_eq!(base.test, shifted.test);
}

#[test]
fn test_oversampling_touches_only_train() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), AI_FILE, &ai_csv(0.0));

    let run = |oversample: bool| {
        let mut profile = SourceProfile::ai();
        profile.oversample_train = oversample;
        PreprocessingPipeline::new(profile, config(dir.path(), 42))
            .unwrap()
            .run()
            .unwrap()
    };
    let plain = run(false);
    let balanced = run(true);

    assert!(plain.report.rebalance.is_none());
    let summary = balanced.report.rebalance.as_ref().unwrap();
    assert_eq!(summary.before, plain.report.split.train_distribution);
    assert_eq!(balanced.train.n_rows(), 80 + summary.added_rows);
    assert_eq!(balanced.train.n_rows(), 96);

    let train_counts = &balanced.report.class_distribution[&Partition::Train];
    assert!(train_counts.values().all(|&c| c == 32));
    assert_eq!(balanced.report.split.train_rows, 80);

    assert_eq!(balanced.test, plain.test);
    assert_eq!(balanced.preprocessor.scaling, plain.preprocessor.scaling);
    assert_eq!(balanced.train.select_rows(&(0..80).collect::<Vec<_>>()), plain.train);
}

#[test]
fn test_seed_controls_the_split() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), AI_FILE, &ai_csv(0.0));

    let run = |seed| {
        PreprocessingPipeline::new(SourceProfile::ai(), config(dir.path(), seed))
            .unwrap()
            .run()
            .unwrap()
    };
    let first = run(42);
    let again = run(42);
    let other = run(7);

    assert_eq!(first.train, again.train);
    assert_eq!(first.report.split.train_distribution, again.report.split.train_distribution);
    assert_ne!(first.test, other.test);
}

#[test]
fn test_ou_pipeline_splits_by_student() {
    let dir = tempfile::tempdir().unwrap();
    write_ou(dir.path());

    let pipeline = PreprocessingPipeline::new(SourceProfile::ou(), config(dir.path(), 42)).unwrap();
    let outcome = pipeline.run().unwrap();
    let report = &outcome.report;

    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.split.strategy, Some(SplitStrategy::EntityLevel));
    assert_eq!(outcome.train.n_rows() + outcome.test.n_rows(), 30);
    assert_eq!(report.leakage.entity_overlap, 0);
    assert_eq!(report.leakage.train_entities + report.leakage.test_entities, 30);

    let names = column_set(&outcome.train);
    for forbidden in ["final_result", "id_student", "date_unregistration", "target_outcome"] {
        assert!(!names.contains(forbidden), "{} leaked into features", forbidden);
    }
    assert!(names.contains("enrollment_date"));
    assert!(names.contains("early_avg_score"));

    assert_eq!(report.temporal.cutoff_day, Some(56.0));
    assert!(report.temporal.available_assessments.contains(&"1".to_string()));
    assert!(report.temporal.target_assessments.contains(&"3".to_string()));
    assert!(report.temporal.max_timestamp_used.unwrap() <= 56.0);
}

#[test]
fn test_ou_repeated_students_stay_on_one_side() {
    let dir = tempfile::tempdir().unwrap();
    write_ou_with_copies(dir.path(), |id| if id % 3 == 0 { 3 } else { 2 });
    let mut profile = SourceProfile::ou();
    profile.deduplicate_entities = false;
    profile.split = SplitStrategy::RowLevel;

    let outcome = PreprocessingPipeline::new(profile, config(dir.path(), 42))
        .unwrap()
        .run()
        .unwrap();
    let report = &outcome.report;

    assert_eq!(report.duplicates_removed, 0);
    assert_eq!(report.split.strategy, Some(SplitStrategy::EntityLevel));
    assert_eq!(outcome.train.n_rows() + outcome.test.n_rows(), 70);
    assert_eq!(report.leakage.entity_overlap, 0);
    assert_eq!(report.leakage.train_entities + report.leakage.test_entities, 30);

    // Identical copies of a student are identical rows; each distinct row
    // must sit in exactly one partition.
    let rows = |table: &Table| -> BTreeSet<String> {
        (0..table.n_rows())
            .map(|r| {
                table
                    .names()
                    .iter()
                    .map(|c| format!("{:.9}", table.numeric(c).unwrap()[r]))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect()
    };
    let (train_rows, test_rows) = (rows(&outcome.train), rows(&outcome.test));
    assert!(train_rows.is_disjoint(&test_rows));
    assert_eq!(train_rows.len(), report.leakage.train_entities);
    assert_eq!(test_rows.len(), report.leakage.test_entities);
}

#[test]
fn test_missing_value_fill_ignores_test_rows() {
    let hours = |i: u32| if i % 10 == 0 { None } else { Some(((i * 13) % 20) as f64) };
    let labels: Vec<WeaknessLevel> = (0..100)
        .map(|i| match ai_total(i) {
            t if t < 60.0 => WeaknessLevel::Weak,
            t if t < 75.0 => WeaknessLevel::Moderate,
            _ => WeaknessLevel::Strong,
        })
        .collect();
    let test_rows: BTreeSet<u32> = Splitter::new(0.2, 42)
        .split(SplitStrategy::RowLevel, &labels, None)
        .unwrap()
        .test
        .into_iter()
        .map(|i| i as u32)
        .collect();
    assert_eq!(test_rows.len(), 20);

    let base_dir = tempfile::tempdir().unwrap();
    let shifted_dir = tempfile::tempdir().unwrap();
    write(base_dir.path(), AI_FILE, &ai_csv_with_hours(0.0, hours));
    write(
        shifted_dir.path(),
        AI_FILE,
        &ai_csv_with_hours(0.0, |i| hours(i).map(|h| if test_rows.contains(&i) { h + 100.0 } else { h })),
    );

    let run = |root: &Path| {
        PreprocessingPipeline::new(SourceProfile::ai(), config(root, 42))
            .unwrap()
            .run()
            .unwrap()
    };
    let base = run(base_dir.path());
    let shifted = run(shifted_dir.path());

    assert!(base.report.missing_values.contains_key("Study_Hours"));
    assert_eq!(base.report.missing_values, shifted.report.missing_values);
    assert_eq!(base.preprocessor.imputation, shifted.preprocessor.imputation);
    assert_eq!(base.train, shifted.train);
    assert_ne!(base.test, shifted.test);
}

#[test]
fn test_ou_later_cutoff_sees_more_activity() {
    let dir = tempfile::tempdir().unwrap();
    write_ou(dir.path());

    let run = |cutoff: &str| {
        PreprocessingPipeline::new(SourceProfile::ou(), config(dir.path(), 42))
            .unwrap()
            .with_prediction_point(cutoff)
            .unwrap()
            .run()
            .unwrap()
            .report
            .temporal
    };
    let early = run("4");
    let late = run("20");

    assert!(early.activity_used < late.activity_used);
    assert!(late.available_assessments.len() >= early.available_assessments.len());
}

#[test]
fn test_uci_persist_and_reapply() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "uci_data/student-mat.csv", &uci_csv(0, 40));
    write(dir.path(), "uci_data/student-por.csv", &uci_csv(40, 40));
    let config = config(dir.path(), 42);

    let outcome = PreprocessingPipeline::new(SourceProfile::uci(), config.clone())
        .unwrap()
        .run()
        .unwrap();
    let names = column_set(&outcome.train);
    for forbidden in ["G1", "G2", "G3", "target_grade", "Mjob"] {
        assert!(!names.contains(forbidden), "{} present", forbidden);
    }
    assert!(names.iter().any(|n| n.starts_with("Mjob_")));
    assert!(names.contains("subject"));
    assert!(names.contains("total_support"));

    let paths = persist(&outcome, &config.output_dir, &config.reports_dir).unwrap();
    for path in [
        &paths.train,
        &paths.test,
        &paths.imputation,
        &paths.encoders,
        &paths.outlier_bounds,
        &paths.scaler,
        &paths.report,
    ] {
        assert!(path.is_file(), "{} missing", path.display());
    }
    assert!(paths.train.ends_with("UCI_train.csv"));
    assert!(paths.report.ends_with("UCI_preprocessing_report.json"));

    let written = Table::read_csv(&paths.train, b',').unwrap();
    assert_eq!(written.names(), outcome.train.names());
    assert_eq!(written.n_rows(), outcome.train.n_rows());

    let loaded = load_preprocessor(&config.output_dir, "UCI").unwrap();
    assert_eq!(loaded.encoding, outcome.preprocessor.encoding);
    assert_eq!(loaded.imputation, outcome.preprocessor.imputation);
    assert_eq!(loaded.feature_columns(), outcome.preprocessor.feature_columns());

    let novel = Table::from_columns(vec![
        ("sex", Column::Text(vec![Some("X".into())])),
        ("age", Column::Numeric(vec![17.0])),
    ])
    .unwrap();
    let (applied, stats) = loaded.transform(novel).unwrap();
    assert_eq!(applied.names(), loaded.feature_columns());
    assert_eq!(stats.unknown_categories["sex"], 1);
    assert!(stats.synthesized_columns > 0);
}
