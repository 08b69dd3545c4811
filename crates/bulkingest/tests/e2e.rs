//! End-to-end: scan, work, status and report over a real store file.

mod common;

use bulkingest::store::job_repo;
use bulkingest::{JobState, ScanWarning};
use common::{ScriptedOcr, TestHarness, ZipBuilder};

#[test]
fn test_full_pipeline_three_files_and_a_zip() {
    let harness = TestHarness::new();
    harness.write_input("invoice.pdf", b"invoice scan");
    harness.write_input("receipts/receipt.jpg", b"receipt scan");
    harness.write_input("letters/letter.tiff", b"letter scan");
    ZipBuilder::new()
        .file("box1/page1.png", b"box page one")
        .file("box1/page2.png", b"box page two")
        .write_to(&harness.input_dir.join("box.zip"));

    let ingest = harness.ingest(ScriptedOcr::new());
    let project = harness.create_project(&ingest);

    let scan = ingest.scan_project(project.id).unwrap();
    assert_eq!(scan.documents_created, 5);
    assert!(scan.warnings.is_empty());

    let counts = ingest.status(project.id).unwrap();
    assert_eq!(counts.total_documents, 5);
    assert_eq!(counts.total_jobs, 5);
    assert_eq!(counts.state(JobState::Pending), 5);

    let work = ingest.work(project.id, 10).unwrap();
    assert_eq!(work.succeeded, 5);
    assert!(!work.is_degraded());

    let counts = ingest.status(project.id).unwrap();
    assert_eq!(counts.state(JobState::Done), 5);
    assert!(counts.is_settled());
    assert_eq!(counts.by_extension.get("png"), Some(&2));
    assert_eq!(
        counts.total_original_bytes,
        [
            "invoice scan",
            "receipt scan",
            "letter scan",
            "box page one",
            "box page two"
        ]
        .iter()
        .map(|s| s.len() as u64)
        .sum::<u64>()
    );

    // Every job points at its OCR outputs.
    for job in job_repo::list_jobs_by_state(ingest.store(), project.id, JobState::Done).unwrap() {
        let json = project
            .root_path
            .join("ocr")
            .join(format!("{}.json", job.document_id));
        assert_eq!(job.output_ref.as_deref(), Some(&*json.to_string_lossy()));
        assert!(json.exists());
        assert!(project
            .root_path
            .join("ocr")
            .join(format!("{}.txt", job.document_id))
            .exists());
    }

    let artifact = ingest.report(project.id).unwrap();
    assert!(artifact.path.starts_with(project.root_path.join("reports")));
    assert!(artifact.report.abandoned.is_empty());
    let text = std::fs::read_to_string(&artifact.path).unwrap();
    assert!(text.contains("DONE: 5"));
    assert!(text.contains("Abandoned jobs: 0"));
}

#[test]
fn test_corrupt_archive_among_valid_files() {
    let harness = TestHarness::new();
    harness.write_input("a.pdf", b"valid one");
    harness.write_input("b.pdf", b"valid two");
    harness.write_input("c.zip", b"definitely not a zip");

    let ingest = harness.ingest(ScriptedOcr::new());
    let project = harness.create_project(&ingest);
    let scan = ingest.scan_project(project.id).unwrap();

    assert_eq!(scan.documents_created, 2);
    assert_eq!(scan.warnings.len(), 1);
    assert!(matches!(scan.warnings[0], ScanWarning::CorruptArchive { .. }));

    let work = ingest.work(project.id, 10).unwrap();
    assert_eq!(work.succeeded, 2);
}

#[test]
fn test_report_lists_abandoned_jobs_with_errors() {
    let harness = TestHarness::with_config(|c| c.max_attempts = 2);
    harness.write_input("ok.pdf", b"fine");
    harness.write_input("smudged.pdf", b"FAIL smudged");

    let ingest = harness.ingest(ScriptedOcr::new());
    let project = harness.create_project(&ingest);
    ingest.scan_project(project.id).unwrap();

    let work = ingest.work(project.id, 10).unwrap();
    assert_eq!(work.abandoned, 1);
    assert!(work.is_degraded());

    let artifact = ingest.report(project.id).unwrap();
    assert_eq!(artifact.report.abandoned.len(), 1);
    let abandoned = &artifact.report.abandoned[0];
    assert!(abandoned.source_path.ends_with("smudged.pdf"));
    assert_eq!(abandoned.attempt_count, 2);

    let text = std::fs::read_to_string(&artifact.path).unwrap();
    assert!(text.contains("Abandoned jobs: 1"));
    assert!(text.contains("scripted failure on attempt 2"));
}

#[test]
fn test_interrupted_run_resumes_from_store() {
    let harness = TestHarness::new();
    for i in 0..4 {
        harness.write_input(&format!("{}.pdf", i), format!("doc {}", i).as_bytes());
    }

    {
        let ingest = harness.ingest(ScriptedOcr::new());
        let project = harness.create_project(&ingest);
        ingest.scan_project(project.id).unwrap();
        assert_eq!(ingest.work(project.id, 2).unwrap().succeeded, 2);
    }

    // A fresh process: reopen the same store and finish.
    let ingest = harness.ingest(ScriptedOcr::new());
    let project = ingest.list_projects().unwrap().remove(0);
    assert!(ingest.scan_project(project.id).unwrap().is_noop());
    assert_eq!(ingest.work(project.id, 10).unwrap().succeeded, 2);
    assert_eq!(ingest.status(project.id).unwrap().state(JobState::Done), 4);
}

#[test]
fn test_folder_structure_explanation() {
    let table = bulkingest::render_folder_structure_table(std::path::Path::new("/srv/data"));
    assert!(table.contains("/srv/data/projects/<project_id>/"));
    assert!(table.contains("Canonical copies of original input files"));
    assert_eq!(bulkingest::folder_structure_table(std::path::Path::new("d")).len(), 6);
}
