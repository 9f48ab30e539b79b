use std::process::Command;
use tempfile::TempDir;

fn cindex(dir: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cindex"));
    command.current_dir(dir).env_remove("RUST_LOG");
    command
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let output = cindex(temp_path)
        .arg("init")
        .output()
        .expect("Failed to run init command");

    assert!(output.status.success());

    let config_path = temp_path.join(".cindex/settings.toml");
    assert!(config_path.exists());

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("version = 1"));
    assert!(content.contains("[indexing]"));
    assert!(content.contains("memory_budget_bytes"));

    // A second init without --force refuses to overwrite
    let output = cindex(temp_path).arg("init").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("--force"), "{stderr}");

    let output = cindex(temp_path).args(["init", "--force"]).output().unwrap();
    assert!(output.status.success());
}

#[test]
fn test_config_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let config_dir = temp_path.join(".cindex");
    std::fs::create_dir_all(&config_dir).unwrap();

    let config_content = r#"
version = 2
[indexing]
parallel_threads = 99
"#;
    std::fs::write(config_dir.join("settings.toml"), config_content).unwrap();

    let output = cindex(temp_path)
        .arg("config")
        .output()
        .expect("Failed to run config command");

    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("version = 2"));
    assert!(stdout.contains("parallel_threads = 99"));
}

#[test]
fn test_index_command_json() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();
    let src = temp_path.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("main.rs"), "fn main() {}").unwrap();
    std::fs::write(src.join("lib.rs"), "pub fn lib() {}").unwrap();
    std::fs::write(src.join("blob.bin"), vec![0u8; 4096]).unwrap();

    let output = cindex(temp_path)
        .env("CINDEX_INDEXING__MAX_FILE_SIZE_BYTES", "1024")
        .args(["index", "--threads", "2", "--json"])
        .arg(&src)
        .output()
        .expect("Failed to run index command");

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["files_total"], 3);
    assert_eq!(stats["files_processed"], 2);
    assert_eq!(stats["files_indexed"], 2);
    assert_eq!(stats["too_large"].as_array().unwrap().len(), 1);
    assert_eq!(stats["too_large"][0]["length"], 4096);
}
