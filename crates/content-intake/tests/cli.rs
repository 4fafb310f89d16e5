use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn intake_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("intake");
    path
}

/// Workbook with one inline-string row per entry; the first entry is the header.
fn write_workbook(path: &Path, rows: &[&[&str]]) {
    let mut sheet = String::new();
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            let col = (b'A' + c as u8) as char;
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                col,
                r + 1,
                value
            ));
        }
        sheet.push_str("</row>");
    }

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(
        "xl/worksheets/sheet1.xml",
        zip::write::SimpleFileOptions::default(),
    )
    .unwrap();
    write!(
        zip,
        r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
        sheet
    )
    .unwrap();
    zip.finish().unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    write_workbook(
        &root.join("cases.xlsx"),
        &[
            &["이름", "산출물명", "활동내용", "업무 연관 AI 사용 툴"],
            &["Kim", "Report bot", "Automated weekly reports", "ChatGPT"],
            &["Lee", "Meeting notes", "Summarized meetings", "Claude"],
            &["Park", "", "", ""],
        ],
    );
    write_workbook(
        &root.join("news.xlsx"),
        &[
            &["title", "link", "content"],
            &["AI chips", "https://news.example.com/article/12345", "Chips story"],
            &["No link here", "", ""],
        ],
    );

    let config_content = format!(
        r#"[db]
path = "{}/data/intake.sqlite"

[admin]
email = "admin@example.com"
id = "operator"
"#,
        root.display()
    );
    let config_path = config_dir.join("intake.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_intake(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = intake_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run intake binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

/// Ids of staged rows whose title contains `needle`.
fn staged_ids(config_path: &Path, needle: &str) -> Vec<String> {
    let (stdout, stderr, success) = run_intake(config_path, &["staged", "list"]);
    assert!(success, "staged list failed: {}", stderr);
    stdout
        .lines()
        .filter(|l| l.contains(needle))
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_intake(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_intake(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_import_lists_candidates_and_rejected_rows() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let workbook = root_of(&config_path).join("cases.xlsx");

    let (stdout, stderr, success) = run_intake(
        &config_path,
        &["import", workbook.to_str().unwrap(), "--kind", "case"],
    );
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("[new] Report bot (kim_report_bot)"));
    assert!(stdout.contains("row 4: missing title"));
    assert!(stdout.contains("candidates: 2"));
}

#[test]
fn test_commit_twice_saves_once() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let root = root_of(&config_path);
    let workbook = root.join("cases.xlsx");
    let review = root.join("review.json");

    let (_, stderr, success) = run_intake(
        &config_path,
        &[
            "import",
            workbook.to_str().unwrap(),
            "--kind",
            "case",
            "--save",
            review.to_str().unwrap(),
        ],
    );
    assert!(success, "import failed: {}", stderr);

    let (stdout, stderr, success) = run_intake(
        &config_path,
        &["commit", review.to_str().unwrap(), "--select", "1"],
    );
    assert!(success, "commit failed: {}", stderr);
    assert!(stdout.contains("saved: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config_path, &["commit", review.to_str().unwrap()]);
    assert!(stdout.contains("saved: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config_path, &["commit", review.to_str().unwrap()]);
    assert!(stdout.contains("saved: 0"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped: 2"), "stdout: {}", stdout);

    // Re-importing now reports both rows as duplicates
    let (stdout, _, _) = run_intake(
        &config_path,
        &["import", workbook.to_str().unwrap(), "--kind", "case"],
    );
    assert!(stdout.contains("duplicates: 2"), "stdout: {}", stdout);
}

#[test]
fn test_publish_pin_and_delete_cycle() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let workbook = root_of(&config_path).join("news.xlsx");

    let (stdout, stderr, success) = run_intake(
        &config_path,
        &["import", workbook.to_str().unwrap(), "--kind", "news", "--commit"],
    );
    assert!(success, "import --commit failed: {}", stderr);
    assert!(stdout.contains("12345"));
    assert!(stdout.contains("row 3: missing link"));
    assert!(stdout.contains("saved: 1"));

    let ids = staged_ids(&config_path, "AI chips");
    assert_eq!(ids.len(), 1);
    let staged_id = ids[0].clone();

    let (stdout, _, success) = run_intake(
        &config_path,
        &["publish", "selected", &staged_id, "missing-id"],
    );
    assert!(success);
    assert!(stdout.contains("published: 1"), "stdout: {}", stdout);
    assert!(stdout.contains("skipped: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config_path, &["staged", "list", "--published", "true"]);
    assert!(stdout.contains("[published]"), "stdout: {}", stdout);

    // Publishing the same staged row again is a no-op
    let (stdout, _, _) = run_intake(&config_path, &["publish", "selected", &staged_id]);
    assert!(stdout.contains("published: 0"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config_path, &["feed", "selected"]);
    let published_id = stdout
        .lines()
        .find(|l| l.contains("AI chips"))
        .and_then(|l| l.split_whitespace().next())
        .unwrap()
        .to_string();

    let (stdout, _, _) = run_intake(&config_path, &["pin", "selected", &published_id]);
    assert!(stdout.contains("pinned: 1"), "stdout: {}", stdout);
    let (stdout, _, _) = run_intake(&config_path, &["feed", "selected"]);
    assert!(stdout.contains(&format!("* {}", published_id)), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(
        &config_path,
        &["update", "selected", "--all", "--author-name", "Desk"],
    );
    assert!(stdout.contains("updated: 1"), "stdout: {}", stdout);

    let (stdout, _, _) = run_intake(&config_path, &["delete", "selected", &published_id]);
    assert!(stdout.contains("deleted: 1"), "stdout: {}", stdout);

    // The staged row survives and is publishable again
    let (stdout, _, _) = run_intake(&config_path, &["staged", "list", "--published", "false"]);
    assert!(stdout.contains("AI chips"), "stdout: {}", stdout);
}

#[test]
fn test_staged_delete_counts_only_existing() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let workbook = root_of(&config_path).join("cases.xlsx");
    run_intake(
        &config_path,
        &["import", workbook.to_str().unwrap(), "--kind", "case", "--commit"],
    );

    let mut ids = staged_ids(&config_path, "  case  ");
    assert_eq!(ids.len(), 2);
    ids.push("does-not-exist".to_string());
    let mut args = vec!["staged", "delete"];
    args.extend(ids.iter().map(String::as_str));

    let (stdout, _, success) = run_intake(&config_path, &args);
    assert!(success);
    assert!(stdout.contains("deleted: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("errors: 0"), "stdout: {}", stdout);
}

#[test]
fn test_update_requires_a_field() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let (_, stderr, success) = run_intake(&config_path, &["update", "feed", "--all"]);
    assert!(!success);
    assert!(stderr.contains("--author-name"));
}

#[test]
fn test_unknown_target_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_intake(&config_path, &["init"]);
    let (_, stderr, success) = run_intake(&config_path, &["feed", "archive"]);
    assert!(!success);
    assert!(stderr.contains("unknown publish target"));
}
