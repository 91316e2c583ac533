use chrono::{Local, TimeZone};
use slidewright::research::{ReportGenerator, ResearchReport, ResearchStep, SourceResult};

fn report(topic: &str) -> ResearchReport {
    ResearchReport {
        topic: topic.to_string(),
        language: "en".to_string(),
        steps: vec![ResearchStep {
            step_number: 1,
            query: "market size".to_string(),
            description: String::new(),
            analysis: "Growing fast.".to_string(),
            completed: true,
            results: vec![SourceResult {
                title: Some("Industry survey".to_string()),
                url: Some("https://example.org/survey".to_string()),
                content: Some("Market grew 40% year over year.".to_string()),
            }],
        }],
        sources: vec!["https://example.org/survey".to_string()],
        executive_summary: "Batteries are getting better.".to_string(),
        key_findings: vec!["Costs are falling".to_string()],
        recommendations: vec!["Invest early".to_string()],
        total_duration: 3.0,
        created_at: Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
    }
}

#[test]
fn save_list_delete() {
    let dir = tempfile::tempdir().unwrap();
    let reports = ReportGenerator::new(dir.path().join("reports"));

    assert!(reports.list_saved().is_empty());

    let path = reports.save(&report("Solid-state batteries"), None).unwrap();
    assert!(path.is_file());
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("# Solid-state batteries"));
    assert!(content.contains("Invest early"));

    let saved = reports.list_saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved[0].filename,
        "research_Solid-state_batteries_20260304_050607.md"
    );
    assert!(saved[0].size > 0);

    assert!(reports.delete(&saved[0].filename));
    assert!(reports.list_saved().is_empty());
    assert!(!reports.delete(&saved[0].filename));
}

#[test]
fn custom_name_is_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let reports = ReportGenerator::new(dir.path());

    let path = reports
        .save(&report("Topic"), Some("q3: summary?"))
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "q3__summary_.md");
}

#[test]
fn delete_refuses_odd_names() {
    let dir = tempfile::tempdir().unwrap();
    let reports = ReportGenerator::new(dir.path());
    std::fs::write(dir.path().join("keep.txt"), "not a report").unwrap();

    assert!(!reports.delete("nonexistent.md"));
    assert!(!reports.delete("keep.txt"));
    assert!(!reports.delete("../keep.md"));
    assert!(dir.path().join("keep.txt").exists());
}

#[test]
fn list_ignores_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let reports = ReportGenerator::new(dir.path());
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
    std::fs::create_dir(dir.path().join("folder.md")).unwrap();

    reports.save(&report("Only one"), Some("only")).unwrap();

    let saved = reports.list_saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].filename, "only.md");
}

#[test]
fn save_into_unwritable_location_fails() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "file, not a dir").unwrap();

    let reports = ReportGenerator::new(blocker.join("reports"));
    assert!(reports.save(&report("x"), None).is_err());
}
