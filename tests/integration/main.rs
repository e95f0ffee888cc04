//! Integration tests for Stagehand

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from the user's config and cache
    fn stagehand(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("stagehand");
        cmd.current_dir(home.path())
            .env("XDG_CACHE_HOME", home.path().join("cache"))
            .env_remove("STAGEHAND_CONFIG")
            .env_remove("RUST_LOG")
            .arg("-c")
            .arg(home.path().join("config.toml"));
        cmd
    }

    fn project(stagehand_toml: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stagehand.toml"), stagehand_toml).unwrap();
        dir
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        stagehand(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("stage-based container image builder"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        stagehand(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagehand"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        stagehand(&home)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_includes_project_images() {
        let dir = project(
            r#"
            [[image]]
            name = "api"
            from = "alpine:3.18"
            "#,
        );
        stagehand(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[[image]]"))
            .stdout(predicate::str::contains("alpine:3.18"));
    }

    #[test]
    fn invalid_project_config() {
        let dir = project("[[image]\nname = ");
        stagehand(&dir)
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn build_without_images() {
        let home = TempDir::new().unwrap();
        stagehand(&home)
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("no [[image]] declared"));
    }

    #[test]
    fn build_unknown_image() {
        let dir = project(
            r#"
            [[image]]
            name = "api"
            from = "alpine:3.18"
            "#,
        );
        stagehand(&dir)
            .args(["build", "web"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Image not defined in configuration: web"));
    }

    #[test]
    fn build_rejects_invalid_stage_before_runtime() {
        let dir = project(
            r#"
            [runtime]
            binary = "podman"

            [[image]]
            name = "api"
            from = ""
            "#,
        );
        stagehand(&dir)
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("stage of image 'api'"));
    }

    #[test]
    fn stub_values_need_no_runtime() {
        let dir = project(
            r#"
            [project]
            name = "shop"

            [[image]]
            name = "api"
            from = "alpine:3.18"
            "#,
        );
        stagehand(&dir)
            .args(["values", "--stub", "--namespace", "shop-prod"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"stub_image\": \"stagehand-stages:TAG\""))
            .stdout(predicate::str::contains("\"namespace\": \"shop-prod\""));
    }

    #[test]
    fn delete_repo_unsupported_registry() {
        let home = TempDir::new().unwrap();
        stagehand(&home)
            .args(["registry", "delete-repo", "ghcr.io/acme/app", "--token", "t"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("only supported for Quay"));
    }
}
