//! Black-box tests of the `sqlmigrate` binary
//!
//! None of these reach a database: they cover `init`, `create` and the
//! failures that happen before a connection is opened.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sqlmigrate(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sqlmigrate"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("SQLMIGRATE__MIGRATIONS_DIR")
        .env_remove("SQLMIGRATE__MIGRATION_TABLE")
        .output()
        .expect("failed to run sqlmigrate")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn migration_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[test]
fn test_init_writes_default_config() {
    let dir = TempDir::new().unwrap();

    let output = sqlmigrate(dir.path(), &["init"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let written = fs::read_to_string(dir.path().join("sqlmigrate.toml")).unwrap();
    assert!(written.contains("migrations_dir = \"migrations\""));
    assert!(written.contains("migration_table = \"migrations\""));
    assert!(written.contains("[database]"));
    assert!(written.contains("port = 5432"));
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sqlmigrate.toml"), "# hand edited\n").unwrap();

    let output = sqlmigrate(dir.path(), &["init"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("config file exists"));
    assert_eq!(
        fs::read_to_string(dir.path().join("sqlmigrate.toml")).unwrap(),
        "# hand edited\n"
    );
}

#[test]
fn test_init_honours_config_path() {
    let dir = TempDir::new().unwrap();

    let output = sqlmigrate(dir.path(), &["--config", "custom.toml", "init"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(dir.path().join("custom.toml").exists());
    assert!(!dir.path().join("sqlmigrate.toml").exists());
}

#[test]
fn test_create_writes_placeholder_script() {
    let dir = TempDir::new().unwrap();
    assert!(sqlmigrate(dir.path(), &["init"]).status.success());

    let output = sqlmigrate(dir.path(), &["create", "--name", "add_users"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let names = migration_names(&dir.path().join("migrations"));
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("-add_users.sql"));
    assert_eq!(names[0].len(), "20240101000000-add_users.sql".len());
    assert!(stdout(&output).trim_end().ends_with(&names[0]));

    let content = fs::read_to_string(dir.path().join("migrations").join(&names[0])).unwrap();
    assert_eq!(content, "-- migration script --");
}

#[test]
fn test_create_default_label() {
    let dir = TempDir::new().unwrap();
    assert!(sqlmigrate(dir.path(), &["init"]).status.success());

    let output = sqlmigrate(dir.path(), &["create"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let names = migration_names(&dir.path().join("migrations"));
    assert!(names[0].ends_with("-new-migration.sql"));
}

#[test]
fn test_create_rejects_dotted_label() {
    let dir = TempDir::new().unwrap();
    assert!(sqlmigrate(dir.path(), &["init"]).status.success());

    let output = sqlmigrate(dir.path(), &["create", "--name", "v1.2"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("migration error:"));
    assert!(!dir.path().join("migrations").exists());
}

#[test]
fn test_environment_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    assert!(sqlmigrate(dir.path(), &["init"]).status.success());

    let output = Command::new(env!("CARGO_BIN_EXE_sqlmigrate"))
        .args(["create", "--name", "from_env"])
        .current_dir(dir.path())
        .env("SQLMIGRATE__MIGRATIONS_DIR", "db/scripts")
        .output()
        .expect("failed to run sqlmigrate");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(migration_names(&dir.path().join("db/scripts")).len(), 1);
    assert!(!dir.path().join("migrations").exists());
}

#[test]
fn test_missing_config_is_reported() {
    let dir = TempDir::new().unwrap();

    for args in [&["create"][..], &["migrate"][..], &[][..]] {
        let output = sqlmigrate(dir.path(), args);
        assert_eq!(output.status.code(), Some(1), "args: {args:?}");
        assert!(
            stderr(&output).contains("sqlmigrate.toml"),
            "stderr: {}",
            stderr(&output)
        );
    }
}

#[test]
fn test_unsafe_table_name_is_rejected_before_connecting() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sqlmigrate.toml"),
        "migration_table = \"bad name\"\n",
    )
    .unwrap();

    let output = sqlmigrate(dir.path(), &["migrate"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("migration_table"));
    assert!(!dir.path().join("migrations").exists());
}
