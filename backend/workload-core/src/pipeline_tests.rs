// src/pipeline_tests.rs

#[cfg(test)]
mod tests {
    use crate::budget::BudgetStatus;
    use crate::config::{AmbiguousMatchPolicy, JoinKind, PipelineConfig};
    use crate::error::PipelineError;
    use crate::export::{
        publish, workbook_bytes, write_workbook, BUDGET_SHEET, MASTER_DATA_SHEET, RUN_REPORT_SHEET, TEAM_SUMMARY_SHEET,
        TIME_OFF_SHEET,
    };
    use crate::loader::{SourceFile, SourceFormat};
    use crate::normalizer::{INTERNAL_BILLABLE, PROJECTS};
    use crate::pipeline::*;
    use crate::report::{RowWarning, WarningKind};
    use crate::store::ArtifactStore;
    use crate::temporal::WeekIndex;
    use calamine::{open_workbook_auto_from_rs, Reader};
    use rust_decimal_macros::dec;
    use std::io::Cursor;
    use std::path::PathBuf;

    // (employee, activity date, client, product/service, duration)
    type Row<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str);

    // Builds a timesheet export: banner, header, then rows grouped under
    // employee header rows with a total row after each group.
    fn timesheet_csv(rows: &[Row]) -> SourceFile {
        let mut csv = String::from(
            "Acme Engineering\nTime Activities by Employee Detail\nJanuary 2025\n\n\
             ,Activity date,Client full name,Product/Service full name,Duration\n",
        );
        let mut current: Option<&str> = None;
        for (employee, date, client, category, duration) in rows {
            if current != Some(*employee) {
                if let Some(previous) = current {
                    csv.push_str(&format!("Total for {},,,,\n", previous));
                }
                csv.push_str(&format!("*{},,,,\n", employee));
                current = Some(*employee);
            }
            csv.push_str(&format!(",{},{},{},{}\n", date, client, category, duration));
        }
        SourceFile::from_bytes("timesheet.csv", SourceFormat::Csv, csv.into_bytes())
    }

    fn roster_csv(rows: &[(&str, &str, &str, &str)]) -> SourceFile {
        let mut csv = String::from("Employee Name,Team Name,Position,USD/Hr\n");
        for (name, team, position, rate) in rows {
            csv.push_str(&format!("{},{},{},{}\n", name, team, position, rate));
        }
        SourceFile::from_bytes("roster.csv", SourceFormat::Csv, csv.into_bytes())
    }

    fn budget_csv(rows: &[(&str, &str, &str)]) -> SourceFile {
        let mut csv = String::from("Num,Amount,Project Manager\n");
        for (num, amount, manager) in rows {
            csv.push_str(&format!("{},{},{}\n", num, amount, manager));
        }
        SourceFile::from_bytes("budget.csv", SourceFormat::Csv, csv.into_bytes())
    }

    fn inputs(timesheet: SourceFile, roster: Option<SourceFile>, budget: Option<SourceFile>) -> PipelineInputs {
        PipelineInputs {
            timesheet,
            roster,
            budget,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("workload_pipeline_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn standard_roster() -> SourceFile {
        roster_csv(&[
            ("Jane", "Sagar & Team", "Senior Engineer", "1500"),
            ("Bob", "Vinoth & Team", "Intern", "20"),
        ])
    }

    #[test]
    fn test_unrostered_employee_is_kept_with_null_enrichment() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "Acme Corp", "Rates:Senior Engineer I", "8:00"),
            ("John Doe", "01/15/2025", "Acme Corp", "Rates:Intern", "4:00"),
            ("John Doe", "01/16/2025", "Acme Corp", "Rates:Intern", "4:00"),
        ]);
        let result = run(
            &inputs(timesheet, Some(standard_roster()), None),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();

        assert_eq!(result.facts.len(), 3, "left join keeps every entry");
        let john: Vec<_> = result
            .facts
            .iter()
            .filter(|f| f.entry.employee_name == "John Doe")
            .collect();
        assert_eq!(john.len(), 2);
        assert!(john.iter().all(|f| f.team_name.is_none() && f.hourly_rate.is_none()));
        assert_eq!(john[0].project_revenue, dec!(0));

        assert_eq!(result.report.count(WarningKind::RosterMismatch), 2);
        assert!(result.report.warnings.contains(&RowWarning::RosterMismatch {
            employee_name: "John Doe".into(),
            rows: 2
        }));

        let jane = &result.facts[0];
        assert_eq!(jane.team_name.as_deref(), Some("Sagar & Team"));
        assert_eq!(jane.project_revenue, dec!(12000));
        assert_eq!(result.report.skipped_summary_rows, 1);
    }

    #[test]
    fn test_inner_join_drops_unrostered_rows() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "Acme Corp", "Rates:Senior Engineer I", "8:00"),
            ("John Doe", "01/15/2025", "Acme Corp", "Rates:Intern", "4:00"),
        ]);
        let config = PipelineConfig {
            roster_join: JoinKind::Inner,
            ..PipelineConfig::default()
        };
        let result = run(&inputs(timesheet, Some(standard_roster()), None), &config, CleaningOptions::default()).unwrap();
        assert_eq!(result.facts.len(), 1);
        assert_eq!(result.report.count(WarningKind::RosterMismatch), 1);
    }

    #[test]
    fn test_internal_billing_override_end_to_end() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "Enerzinx LLC:Internal", "Projects", "3:00"),
            ("Jane", "01/15/2025", "Enerzinx LLC:Internal", "Rates:Senior Engineer I", "1:00"),
        ]);
        let result = run(
            &inputs(timesheet, Some(standard_roster()), None),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();
        assert!(result
            .facts
            .iter()
            .all(|f| f.entry.service_category == INTERNAL_BILLABLE));
        assert!(result.facts.iter().all(|f| f.project_revenue == dec!(0)));
    }

    #[test]
    fn test_budget_exceeded_and_within() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "1037-882 Acme Corp", "Rates:Senior Engineer I", "8:00"),
            ("Bob", "01/15/2025", "2200-100 Beta", "Rates:Intern", "5:00"),
        ]);
        let budget = budget_csv(&[
            ("1037-882", "10000", "Priya"),
            ("2200-100", "100", "Sam"),
            ("9999", "500", "Nobody"),
        ]);
        let result = run(
            &inputs(timesheet, Some(standard_roster()), Some(budget)),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();
        let comparison = result.budget_comparison().unwrap();

        assert_eq!(comparison.len(), 3);
        assert_eq!(comparison[0].project_code, "1037-882");
        assert_eq!(comparison[0].total_cost, dec!(12000));
        assert_eq!(comparison[0].status, BudgetStatus::Exceeded);
        assert_eq!(comparison[0].client_list(), "1037-882 Acme Corp");
        assert_eq!(comparison[0].manager, "Priya");

        assert_eq!(comparison[1].total_cost, dec!(100));
        assert_eq!(comparison[1].status, BudgetStatus::WithinBudget, "equality is within budget");

        assert_eq!(comparison[2].matched_rows, 0);
        assert_eq!(comparison[2].client_list(), "N/A");
        assert_eq!(result.report.count(WarningKind::BudgetMismatch), 1);
    }

    #[test]
    fn test_overlapping_codes_are_summed_into_each_by_default() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "1037-882 Acme Corp", "Rates:Senior Engineer I", "1:00"),
            ("Jane", "01/16/2025", "1037-100 Acme Corp", "Rates:Senior Engineer I", "1:00"),
        ]);
        let budget = budget_csv(&[("1037", "5000", "Priya"), ("1037-882", "5000", "Priya")]);
        let result = run(
            &inputs(timesheet, Some(standard_roster()), Some(budget)),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();

        let comparison = result.budget_comparison().unwrap();
        assert_eq!(comparison[0].total_cost, dec!(3000), "1037 matches both rows");
        assert_eq!(comparison[1].total_cost, dec!(1500));
        assert_eq!(comparison[0].overlapping_codes, vec!["1037-882".to_string()]);
        assert_eq!(comparison[1].overlapping_codes, vec!["1037".to_string()]);
        assert_eq!(result.report.count(WarningKind::AmbiguousBudgetMatch), 1);
    }

    #[test]
    fn test_overlapping_codes_fail_under_reject_policy() {
        let timesheet = timesheet_csv(&[(
            "Jane",
            "01/15/2025",
            "1037-882 Acme Corp",
            "Rates:Senior Engineer I",
            "1:00",
        )]);
        let budget = budget_csv(&[("1037", "5000", "Priya"), ("1037-882", "5000", "Priya")]);
        let config = PipelineConfig {
            ambiguous_budget_policy: AmbiguousMatchPolicy::Reject,
            ..PipelineConfig::default()
        };
        let err = run(
            &inputs(timesheet, Some(standard_roster()), Some(budget)),
            &config,
            CleaningOptions::default(),
        )
        .unwrap_err();
        match err {
            PipelineError::AmbiguousBudgetMatch { client, codes } => {
                assert_eq!(client, "1037-882 Acme Corp");
                assert_eq!(codes, vec!["1037".to_string(), "1037-882".to_string()]);
            }
            other => panic!("Expected AmbiguousBudgetMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_roster_aborts_only_that_input() {
        let timesheet = timesheet_csv(&[("Jane", "01/15/2025", "Acme Corp", "Rates:Intern", "8:00")]);
        let roster = SourceFile::from_bytes(
            "roster.csv",
            SourceFormat::Csv,
            b"Employee Name,Team\nJane,Alpha\n".to_vec(),
        );
        let result = run(&inputs(timesheet, Some(roster), None), &PipelineConfig::default(), CleaningOptions::default())
            .unwrap();

        assert_eq!(result.facts.len(), 1);
        assert!(result.roster.is_none());
        assert_eq!(result.report.aborted_sources.len(), 1);
        assert!(result.report.aborted_sources[0].message.contains("Position"));
        assert!(matches!(
            result.team_report(),
            Err(PipelineError::MissingInput { input: "roster", .. })
        ));
        assert!(matches!(
            result.budget_comparison(),
            Err(PipelineError::MissingInput { .. })
        ));
        assert_eq!(result.weekly_summaries().len(), 1, "weekly view needs no roster");
    }

    #[test]
    fn test_malformed_timesheet_aborts_run() {
        let timesheet = SourceFile::from_bytes(
            "timesheet.csv",
            SourceFormat::Csv,
            b"a\nb\nc\nd\n,Activity date,Client full name\n".to_vec(),
        );
        let err = run(&inputs(timesheet, None, None), &PipelineConfig::default(), CleaningOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSource { ref missing_columns, .. } if missing_columns.len() == 2));
    }

    #[test]
    fn test_cleaning_options() {
        let timesheet = timesheet_csv(&[
            ("Jane", "01/15/2025", "Acme   Corp", "Rates:Intern", "8:00"),
            ("Jane", "01/15/2025", "Acme   Corp", "Rates:Intern", "8:00"),
            ("Jane", "01/16/2025", "Acme Corp", "Rates:Intern", "8:00"),
        ]);
        let options = CleaningOptions {
            trim_text: true,
            drop_duplicates: true,
            ..CleaningOptions::default()
        };
        let result = run(&inputs(timesheet, None, None), &PipelineConfig::default(), options).unwrap();
        assert_eq!(result.facts.len(), 2);
        assert_eq!(result.report.duplicates_removed, 1);
        assert!(result.facts.iter().all(|f| f.entry.client == "Acme Corp"));
    }

    #[test]
    fn test_missing_value_treatments() {
        let timesheet = || {
            timesheet_csv(&[
                ("Jane", "01/15/2025", "Acme Corp", "Rates:Intern", "8:00"),
                ("Jane", "01/16/2025", "", "Rates:Intern", "2:00"),
                ("Jane", "someday", "Acme Corp", "Training", "1:00"),
                ("Jane", "01/17/2025", "Acme Corp", "Training", "lots"),
            ])
        };
        let run_with = |missing_values| {
            let options = CleaningOptions {
                missing_values,
                ..CleaningOptions::default()
            };
            run(&inputs(timesheet(), None, None), &PipelineConfig::default(), options).unwrap()
        };

        let kept = run_with(MissingValues::Keep);
        assert_eq!(kept.facts.len(), 4);
        assert_eq!(kept.facts[1].entry.client, "");
        assert_eq!(kept.facts[0].entry.description, None);

        let filled = run_with(MissingValues::FillUnknown);
        assert_eq!(filled.facts.len(), 4);
        assert_eq!(filled.facts[1].entry.client, UNKNOWN_FILL);
        assert_eq!(filled.facts[0].entry.description.as_deref(), Some(UNKNOWN_FILL));
        assert_eq!(filled.facts[0].entry.client, "Acme Corp");

        let zeroed = run_with(MissingValues::FillZero);
        assert_eq!(zeroed.facts[1].entry.client, "0");
        assert_eq!(zeroed.facts[3].entry.duration_hours, 0.0);

        let dropped = run_with(MissingValues::DropRows);
        assert_eq!(dropped.facts.len(), 1, "blank client, bad date and bad duration rows go");
        assert_eq!(dropped.report.incomplete_rows_dropped, 3);
        assert_eq!(dropped.facts[0].entry.duration_hours, 8.0);
    }

    #[test]
    fn test_failed_artifact_save_publishes_no_workbook() {
        let dir = temp_dir("publish");
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let workbook_path = dir.join("summary.xlsx");

        let timesheet = timesheet_csv(&[("Jane", "01/15/2025", "Acme Corp", "Rates:Intern", "8:00")]);
        let result = run(&inputs(timesheet, None, None), &PipelineConfig::default(), CleaningOptions::default())
            .unwrap();

        let err = publish(&result, &ArtifactStore::new(&blocker), &workbook_path).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }), "got {:?}", err);
        assert!(!workbook_path.exists(), "workbook must not be published without the artifact");

        let store = ArtifactStore::new(dir.join("artifacts"));
        let metadata = publish(&result, &store, &workbook_path).unwrap();
        assert_eq!(metadata.fact_rows, 1);
        assert!(workbook_path.exists());
        assert!(store.load().unwrap().is_some());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_artifact_store_round_trip_and_corrupt_file() {
        let dir = temp_dir("store");
        let timesheet = timesheet_csv(&[("Jane", "01/15/2025", "Acme Corp", "Rates:Intern", "8:30")]);
        let result = run(
            &inputs(timesheet, Some(standard_roster()), None),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();

        let store = ArtifactStore::new(&dir);
        assert!(store.load().unwrap().is_none());
        let metadata = store.save(&result).unwrap();
        assert_eq!(metadata.fact_rows, 1);
        assert_eq!(metadata.sources, vec!["timesheet.csv".to_string(), "roster.csv".to_string()]);

        let loaded = store.load().unwrap().expect("artifact should load");
        assert_eq!(loaded.result, result, "reloaded result must equal the saved one");
        assert_eq!(loaded.result.facts[0].entry.week, Some(WeekIndex::Week(3)));
        assert_eq!(loaded.result.facts[0].entry.service_category, PROJECTS);

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().unwrap().is_none(), "corrupt artifact is treated as absent");
        assert!(!store.path().exists(), "corrupt artifact is removed");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_workbook_has_named_sheets() {
        let timesheet = timesheet_csv(&[("Jane", "01/15/2025", "1037-882 Acme", "Rates:Intern", "8:00")]);
        let with_budget = run(
            &inputs(
                timesheet.clone(),
                Some(standard_roster()),
                Some(budget_csv(&[("1037-882", "10000", "Priya")])),
            ),
            &PipelineConfig::default(),
            CleaningOptions::default(),
        )
        .unwrap();
        let bytes = workbook_bytes(&with_budget).unwrap();
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).unwrap();
        let names = workbook.sheet_names();
        for expected in [MASTER_DATA_SHEET, TEAM_SUMMARY_SHEET, TIME_OFF_SHEET, BUDGET_SHEET, RUN_REPORT_SHEET] {
            assert!(names.iter().any(|n| n == expected), "missing sheet {}: {:?}", expected, names);
        }

        let without_inputs = run(&inputs(timesheet, None, None), &PipelineConfig::default(), CleaningOptions::default())
            .unwrap();
        let dir = temp_dir("workbook");
        let path = dir.join("out.xlsx");
        write_workbook(&without_inputs, &path).unwrap();
        let workbook = calamine::open_workbook_auto(&path).unwrap();
        let names = workbook.sheet_names();
        assert!(!names.iter().any(|n| n == BUDGET_SHEET));
        assert!(!names.iter().any(|n| n == TEAM_SUMMARY_SHEET));
        assert!(!names.iter().any(|n| n == TIME_OFF_SHEET));
        assert!(names.iter().any(|n| n == MASTER_DATA_SHEET));
        let _ = std::fs::remove_dir_all(dir);
    }
}
