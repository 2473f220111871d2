//! CLI contract tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use nix::unistd::{getgid, getuid, Group, User};

fn templates() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

fn entrypoint(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bamboo-entrypoint").expect("binary should be built");
    cmd.env_clear()
        .env("PATH", "/usr/bin:/bin")
        .env("ENTRYPOINT_CONFIG_PATH", config_dir.join("entrypoint.toml"))
        .env("ENTRYPOINT_TEMPLATE_DIR", templates());
    cmd
}

fn install(root: &Path) {
    for sub in [
        "install/bin",
        "install/conf",
        "install/atlassian-bamboo/WEB-INF/classes",
        "home",
    ] {
        std::fs::create_dir_all(root.join(sub)).expect("should create fixture dir");
    }
    let script = root.join("install/bin/start-bamboo.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\n\
         echo \"args=$*\"\n\
         echo \"jvm=$JVM_SUPPORT_RECOMMENDED_ARGS\"\n\
         echo \"password=${ATL_JDBC_PASSWORD:-unset}\"\n",
    )
    .expect("should write start script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}

fn identity_env(cmd: &mut Command, root: &Path) {
    let user = User::from_uid(getuid())
        .expect("lookup")
        .expect("current user should exist");
    let group = Group::from_gid(getgid())
        .expect("lookup")
        .expect("current group should exist");
    cmd.env("RUN_USER", user.name)
        .env("RUN_GROUP", group.name)
        .env("BAMBOO_INSTALL_DIR", root.join("install"))
        .env("BAMBOO_HOME", root.join("home"))
        .env("BUILD_NUMBER", "61009")
        .env("ENTRYPOINT_CONTAINER_ID_PATH", root.join("container_id"));
}

#[test]
fn render_prints_template() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let output = entrypoint(dir.path())
        .args(["render", "server.xml.j2"])
        .env("ATL_TOMCAT_PORT", "9095")
        .env("ATL_TOMCAT_CONTEXTPATH", "/mybamboo")
        .output()
        .expect("should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("port=\"9095\""));
    assert!(stdout.contains("path=\"/mybamboo\""));
}

#[test]
fn render_unknown_template_fails() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    entrypoint(dir.path())
        .args(["render", "nope.xml.j2"])
        .assert()
        .failure();
}

#[test]
fn generate_reports_each_file() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    install(dir.path());
    let mut cmd = entrypoint(dir.path());
    identity_env(&mut cmd, dir.path());
    let output = cmd.arg("generate").output().expect("should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("written\t"));
    assert!(stdout.contains("bamboo.cfg.xml"));
    assert!(stdout.contains("jvm\t-Dbamboo.setup.rss.in.docker=false"));
    assert!(dir.path().join("install/conf/server.xml").exists());
    assert!(!dir.path().join("home/docker-app.pid").exists());
}

#[test]
fn missing_required_variable_fails() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let output = entrypoint(dir.path())
        .arg("generate")
        .output()
        .expect("should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("RUN_USER"));
}

#[test]
fn run_execs_server_without_secrets() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    install(dir.path());
    let mut cmd = entrypoint(dir.path());
    identity_env(&mut cmd, dir.path());
    let output = cmd
        .env("ATL_JDBC_PASSWORD", "hunter2")
        .env("JVM_SUPPORT_RECOMMENDED_ARGS", "-Xss2m")
        .output()
        .expect("should run");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("args=-fg"));
    assert!(stdout.contains("jvm=-Xss2m -Dbamboo.setup.rss.in.docker=false"));
    assert!(stdout.contains("password=unset"));

    let pid = std::fs::read_to_string(dir.path().join("home/docker-app.pid"))
        .expect("pid file should exist");
    assert!(pid.trim().parse::<u32>().is_ok());
}

#[test]
fn invalid_log_format_is_reported() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let output = entrypoint(dir.path())
        .args(["render", "bamboo-init.properties.j2"])
        .env("ENTRYPOINT_LOG_FORMAT", "xml")
        .output()
        .expect("should run");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ignoring invalid env override"));
    assert!(stderr.contains("ENTRYPOINT_LOG_FORMAT"));
}
