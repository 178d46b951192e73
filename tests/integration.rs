use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CHAPTER: &str = "The rain had not stopped for three days. Mara watched it from the window.\n\n\
\"We leave at dawn,\" her brother said. She did not answer him.\n\n\
By morning the road was a river. They left anyway, and nobody looked back.\n";

fn chapterloom_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chapterloom"))
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let chapter = root.join("chapter-01.txt");
    fs::write(&chapter, CHAPTER).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/chapterloom.sqlite"

[segmenting]
chunk_size = 10

[dispatch]
concurrency = 2
max_retries = 1
backoff_base_ms = 1
backoff_max_ms = 2

[transform]
provider = "disabled"

[summary]
group_size = 2
"#,
        root.display()
    );

    let config_path = config_dir.join("chapterloom.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, chapter)
}

fn run_chapterloom(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chapterloom_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chapterloom binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_chapterloom(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/chapterloom.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, first) = run_chapterloom(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_chapterloom(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_plan_lists_segments() {
    let (_tmp, config_path, chapter) = setup_test_env();

    let (stdout, stderr, success) =
        run_chapterloom(&config_path, &["plan", chapter.to_str().unwrap()]);
    assert!(success, "plan failed: {}", stderr);
    assert!(stdout.contains("INDEX"));
    assert!(stdout.contains("chunk_size = 10"));
    // 40 words at chunk_size 10 is four segments.
    assert!(stdout.contains("4 segments, 40 words"), "stdout={}", stdout);
}

#[test]
fn test_plan_without_config_file() {
    let (tmp, _, chapter) = setup_test_env();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) =
        run_chapterloom(&missing, &["plan", chapter.to_str().unwrap()]);
    assert!(success, "plan failed: {}", stderr);
    assert!(stdout.contains("1 segments, 40 words"), "stdout={}", stdout);
}

#[test]
fn test_enhance_disabled_keeps_original_text() {
    let (_tmp, config_path, chapter) = setup_test_env();

    let (stdout, stderr, success) =
        run_chapterloom(&config_path, &["enhance", chapter.to_str().unwrap()]);
    assert!(success, "enhance should exit 0 despite segment failures: {}", stderr);
    assert_eq!(stdout, CHAPTER);
    assert!(stderr.contains("4 failed"), "stderr={}", stderr);
    assert!(stderr.contains("segment 0 failed: invalid_input"));
}

#[test]
fn test_enhance_markers_and_output_file() {
    let (tmp, config_path, chapter) = setup_test_env();
    let out = tmp.path().join("out.txt");

    let (_, stderr, success) = run_chapterloom(
        &config_path,
        &[
            "enhance",
            chapter.to_str().unwrap(),
            "--markers",
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "enhance failed: {}", stderr);

    let written = fs::read_to_string(&out).unwrap();
    assert!(written.contains("[segment 0: original, failed (invalid_input"));
    assert!(written.contains("[segment 3: original, failed"));
    assert!(written.contains("By morning the road was a river."));
}

#[test]
fn test_enhance_rejects_unknown_segment() {
    let (_tmp, config_path, chapter) = setup_test_env();

    let (_, stderr, success) = run_chapterloom(
        &config_path,
        &["enhance", chapter.to_str().unwrap(), "--regenerate", "99"],
    );
    assert!(!success);
    assert!(stderr.contains("only 4 segments"), "stderr={}", stderr);
}

#[test]
fn test_enhance_missing_file_fails() {
    let (tmp, config_path, _) = setup_test_env();
    let missing = tmp.path().join("missing.txt");

    let (_, stderr, success) =
        run_chapterloom(&config_path, &["enhance", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read chapter"));
}

#[test]
fn test_summarize_reports_unready_groups() {
    let (_tmp, config_path, chapter) = setup_test_env();

    let (stdout, stderr, success) =
        run_chapterloom(&config_path, &["summarize", chapter.to_str().unwrap()]);
    assert!(success, "summarize failed: {}", stderr);
    assert!(stdout.contains("## Group 0 (segments 0-1)"));
    assert!(stdout.contains("## Group 1 (segments 2-3)"));
    assert!(stdout.contains("[not ready: 2 segment(s) unfinished]"));
    assert!(stderr.contains("summaries: 2 groups"));
}

#[test]
fn test_cache_stats_and_clear() {
    let (_tmp, config_path, _) = setup_test_env();
    run_chapterloom(&config_path, &["init"]);

    let (stdout, stderr, success) = run_chapterloom(&config_path, &["cache", "stats"]);
    assert!(success, "cache stats failed: {}", stderr);
    assert!(stdout.contains("entries:  0"));

    let (stdout, _, success) = run_chapterloom(&config_path, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Removed 0 cache entries."));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path, _) = setup_test_env();
    fs::write(&config_path, "[db]\npath = \"x.sqlite\"\n[dispatch]\nconcurrency = 0\n").unwrap();

    let (_, stderr, success) = run_chapterloom(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("dispatch.concurrency"));
}
