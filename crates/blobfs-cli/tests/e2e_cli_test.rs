//! E2E tests for the blobfs binary
//!
//! Each test runs the built binary against an isolated store, with `HOME`
//! and the working directory pointed into the test environment so no real
//! config is picked up.

use std::process::{Command, Output};

use blobfs_config::testing::TestEnvironment;

fn blobfs(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_blobfs"))
        .args(args)
        .current_dir(&env.work_dir)
        .env("HOME", &env.work_dir)
        .env_remove("BLOBFS_MODE")
        .env_remove("BLOBFS_DIGEST")
        .env_remove("BLOBFS_LOG")
        .envs(env.cli_env())
        .output()
        .expect("Failed to execute blobfs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn ids(output: &Output) -> Vec<String> {
    stdout(output).lines().map(str::to_string).collect()
}

// ========== E2E: Save / Load / Delete ==========

#[test]
fn e2e_refcount_save_load_delete() {
    let env = TestEnvironment::new().unwrap();
    let file = env.create_file("hello.txt", b"hello").unwrap();
    let file = file.to_str().unwrap();

    let output = blobfs(&env, &["save", file, file]);
    assert!(output.status.success(), "{:?}", output);
    let saved = ids(&output);
    assert_eq!(
        saved,
        vec![
            "5d41402abc4b2a76b9719d911017c592/1#1",
            "5d41402abc4b2a76b9719d911017c592/1#2"
        ]
    );

    let output = blobfs(&env, &["load", &saved[1]]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"hello");

    let output = blobfs(&env, &["delete", &saved[0]]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("deleted"));

    // The second reference still resolves
    let output = blobfs(&env, &["find", &saved[1]]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("5 bytes"));

    let output = blobfs(&env, &["delete", &saved[0], &saved[1]]);
    assert!(output.status.success());
    assert_eq!(
        ids(&output),
        vec![format!("not found\t{}", saved[0]), format!("deleted\t{}", saved[1])]
    );

    let output = blobfs(&env, &["find", &saved[1]]);
    assert!(!output.status.success());
    assert_eq!(stdout(&output).trim(), "unavailable");
}

#[test]
fn e2e_plain_mode_from_flag() {
    let env = TestEnvironment::new().unwrap();
    let file = env.create_file("a.bin", b"payload").unwrap();
    let file = file.to_str().unwrap();

    let output = blobfs(&env, &["--mode", "plain", "save", file, file]);
    assert!(output.status.success());
    let saved = ids(&output);
    assert_ne!(saved[0], saved[1]);
    assert!(saved.iter().all(|id| !id.contains('/') && !id.contains('#')));

    let out_file = env.work_dir.join("copy.bin");
    let output = blobfs(
        &env,
        &["--mode", "plain", "load", &saved[0], "-o", out_file.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert_eq!(std::fs::read(out_file).unwrap(), b"payload");
}

#[test]
fn e2e_refcount_delete_without_copy_fails() {
    let env = TestEnvironment::new().unwrap();
    let file = env.create_file("a.bin", b"payload").unwrap();
    let output = blobfs(&env, &["save", file.to_str().unwrap()]);
    let id = ids(&output).remove(0);
    let bare = id.split('#').next().unwrap().to_string();

    let output = blobfs(&env, &["delete", &bare]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("copy token"));

    let output = blobfs(&env, &["delete", "not a valid id"]);
    assert!(!output.status.success());
}

#[test]
fn e2e_load_missing_blob_fails() {
    let env = TestEnvironment::new().unwrap();
    let output = blobfs(&env, &["load", "5d41402abc4b2a76b9719d911017c592/1#1"]);
    assert!(!output.status.success());
    // Lookups never create the store
    assert!(!env.store_root.exists());
}

// ========== E2E: Status ==========

#[test]
fn e2e_status_json_reports_dedup() {
    let env = TestEnvironment::new().unwrap();
    let a = env.create_file("a.txt", b"same").unwrap();
    let b = env.create_file("b.txt", b"same").unwrap();
    let c = env.create_file("c.txt", b"different").unwrap();
    let output = blobfs(
        &env,
        &[
            "save",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            c.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());

    let output = blobfs(&env, &["status", "--json"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["blob_count"], 2);
    assert_eq!(stats["marker_count"], 3);
    assert_eq!(stats["total_bytes"], 13);
    assert_eq!(stats["staged_count"], 0);
}

// ========== E2E: Config ==========

#[test]
fn e2e_config_show_returns_valid_toml() {
    let env = TestEnvironment::new().unwrap();
    let output = blobfs(&env, &["config", "show"]);
    assert!(output.status.success());

    let parsed: blobfs_config::Config = toml::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed.store.directory, env.store_root);
    assert_eq!(parsed.store.mode, blobfs_store::StoreMode::RefCounted);
}

#[test]
fn e2e_project_config_is_honored() {
    let env = TestEnvironment::new().unwrap();
    env.write_project_config("[store]\nmode = \"dedup\"\ndigest = \"sha256\"\n")
        .unwrap();
    let file = env.create_file("hello.txt", b"hello").unwrap();

    let output = blobfs(&env, &["save", file.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(
        ids(&output),
        vec!["2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824/1"]
    );
}

#[test]
fn e2e_config_path_lists_both_locations() {
    let env = TestEnvironment::new().unwrap();
    let output = blobfs(&env, &["config", "path"]);
    let out = stdout(&output);
    assert!(output.status.success());
    assert!(out.contains("Global:"));
    assert!(out.contains("Project:"));
    assert!(out.contains("(not found)"));
}
