use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn keel(workdir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keel"));
    cmd.current_dir(workdir).args(args);
    cmd
}

fn project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir(dir.path().join("k8s")).expect("k8s dir");
    fs::write(
        dir.path().join("k8s/web.yaml"),
        "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
      - image: gcr.io/acme/web
        name: web
",
    )
    .expect("manifest");
    fs::write(
        dir.path().join("keel.yaml"),
        "artifacts:
  - image: gcr.io/acme/web
    tag: gcr.io/acme/web:v1
deploy:
  - manifests: [k8s]
    target: applied
    default_namespace: dev
",
    )
    .expect("config");
    dir
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().expect("tempdir");
    keel(dir.path(), &["--help"])
        .assert()
        .success()
        .stdout(contains("render"))
        .stdout(contains("execute"));
}

#[test]
fn render_prints_substituted_and_labelled_manifests() {
    let dir = project();
    keel(dir.path(), &["render"])
        .assert()
        .success()
        .stdout(contains("image: gcr.io/acme/web:v1"))
        .stdout(contains("app.kubernetes.io/managed-by: keel"))
        .stdout(contains("namespace: dev"));
    assert!(!dir.path().join("applied").exists(), "render must not apply");
}

#[test]
fn render_honours_image_overrides() {
    let dir = project();
    keel(dir.path(), &["render", "--image", "gcr.io/acme/web=gcr.io/acme/web:hotfix"])
        .assert()
        .success()
        .stdout(contains("image: gcr.io/acme/web:hotfix"));

    keel(dir.path(), &["render", "--image", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(contains("expected <image>=<ref>"));
}

#[test]
fn render_without_config_fails() {
    let dir = TempDir::new().expect("tempdir");
    keel(dir.path(), &["render"])
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}

#[test]
fn diff_shows_new_files_then_nothing_once_applied() {
    let dir = project();
    keel(dir.path(), &["diff"])
        .assert()
        .success()
        .stdout(contains("+++ b/dev/deployment--web.yaml"))
        .stdout(contains("gcr.io/acme/web:v1"));

    let rendered = keel(dir.path(), &["render"]).output().expect("render");
    let target = dir.path().join("applied/dev");
    fs::create_dir_all(&target).expect("target dir");
    fs::write(target.join("deployment--web.yaml"), &rendered.stdout).expect("apply by hand");

    keel(dir.path(), &["diff"])
        .assert()
        .success()
        .stdout(contains("No differences."));
}

#[test]
fn control_commands_without_session() {
    let dir = project();
    keel(dir.path(), &["stop"])
        .assert()
        .success()
        .stdout(contains("dev session is not running"));
    keel(dir.path(), &["execute", "deploy"]).assert().failure();
    keel(dir.path(), &["events"]).assert().failure();
    keel(dir.path(), &["events", "--follow"])
        .assert()
        .success()
        .stdout(contains("dev session is not running"));
}
