//! Generating config files: overwrite policy, idempotence and ownership.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use bamboo_entrypoint::env::Environment;
use bamboo_entrypoint::materialize::{ConfigArtifact, Materialized, Materializer};
use bamboo_entrypoint::perms::PermOutcome;
use bamboo_entrypoint::template::Renderer;
use nix::unistd::{getgid, getuid, Group, User};

fn current_names() -> (String, String) {
    let user = User::from_uid(getuid())
        .expect("user lookup should succeed")
        .expect("current user should exist");
    let group = Group::from_gid(getgid())
        .expect("group lookup should succeed")
        .expect("current group should exist");
    (user.name, group.name)
}

fn setup() -> (tempfile::TempDir, Renderer) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    std::fs::create_dir(dir.path().join("templates")).expect("should create template dir");
    std::fs::write(
        dir.path().join("templates/app.properties.j2"),
        "port={{ atl_tomcat_port or '8085' }}\n",
    )
    .expect("should write template");
    let renderer = Renderer::new(dir.path().join("templates"));
    (dir, renderer)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("should read generated file")
}

#[test]
fn rendering_twice_is_idempotent() {
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let target = dir.path().join("app.properties");
    let artifact = ConfigArtifact::new("app.properties.j2", &target).owned_by(user, group);
    let env = Environment::from_vars([("ATL_TOMCAT_PORT", "9095")]);
    let materializer = Materializer::new(&renderer, false);

    let first = materializer.materialize(&artifact, &env).expect("first render");
    let first_contents = read(&target);
    let second = materializer.materialize(&artifact, &env).expect("second render");

    assert_eq!(first, Materialized::Written(PermOutcome::Applied));
    assert_eq!(second, Materialized::Written(PermOutcome::Applied));
    assert_eq!(first_contents, "port=9095");
    assert_eq!(read(&target), first_contents);
}

#[test]
fn preserved_file_is_left_alone() {
    let (dir, renderer) = setup();
    let target = dir.path().join("bamboo.cfg.xml");
    std::fs::write(&target, "hand edited").expect("should seed target");

    let artifact = ConfigArtifact::new("app.properties.j2", &target).preserve_existing();
    let outcome = Materializer::new(&renderer, false)
        .materialize(&artifact, &Environment::default())
        .expect("materialize");

    assert_eq!(outcome, Materialized::Skipped);
    assert_eq!(read(&target), "hand edited");
}

#[test]
fn force_overwrite_regenerates_preserved_file() {
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let target = dir.path().join("bamboo.cfg.xml");
    std::fs::write(&target, "hand edited").expect("should seed target");

    let artifact = ConfigArtifact::new("app.properties.j2", &target)
        .owned_by(user, group)
        .preserve_existing();
    let outcome = Materializer::new(&renderer, true)
        .materialize(&artifact, &Environment::default())
        .expect("materialize");

    assert!(matches!(outcome, Materialized::Written(_)));
    assert_eq!(read(&target), "port=8085");
}

#[test]
fn mode_is_applied() {
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let target = dir.path().join("secret.properties");
    let artifact = ConfigArtifact::new("app.properties.j2", &target)
        .owned_by(user, group)
        .with_mode(0o600);

    Materializer::new(&renderer, false)
        .materialize(&artifact, &Environment::default())
        .expect("materialize");

    let mode = std::fs::metadata(&target)
        .expect("should stat target")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn per_artifact_variables_override_environment() {
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let target = dir.path().join("app.properties");
    let artifact = ConfigArtifact::new("app.properties.j2", &target)
        .owned_by(user, group)
        .with_var("atl_tomcat_port", "7990");
    let env = Environment::from_vars([("ATL_TOMCAT_PORT", "9095")]);

    Materializer::new(&renderer, false)
        .materialize(&artifact, &env)
        .expect("materialize");
    assert_eq!(read(&target), "port=7990");
}

#[test]
fn missing_template_is_fatal() {
    let (dir, renderer) = setup();
    let artifact = ConfigArtifact::new("nope.j2", dir.path().join("nope"));
    assert!(Materializer::new(&renderer, false)
        .materialize(&artifact, &Environment::default())
        .is_err());
    assert!(!dir.path().join("nope").exists());
}

#[test]
fn missing_parent_directory_is_fatal() {
    let (dir, renderer) = setup();
    let artifact = ConfigArtifact::new("app.properties.j2", dir.path().join("absent/app.properties"));
    assert!(Materializer::new(&renderer, false)
        .materialize(&artifact, &Environment::default())
        .is_err());
}

#[test]
fn materialize_all_keeps_order() {
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let artifacts = [
        ConfigArtifact::new("app.properties.j2", dir.path().join("a")).owned_by(&user, &group),
        ConfigArtifact::new("app.properties.j2", dir.path().join("b")).owned_by(&user, &group),
    ];
    let results = Materializer::new(&renderer, false)
        .materialize_all(&artifacts, &Environment::default())
        .expect("materialize all");
    let paths: Vec<_> = results.iter().map(|(path, _)| path.to_path_buf()).collect();
    assert_eq!(paths, vec![dir.path().join("a"), dir.path().join("b")]);
}

#[test]
fn root_ownership_is_denied_but_file_is_written() {
    if nix::unistd::geteuid().is_root() {
        return;
    }
    let (dir, renderer) = setup();
    let target = dir.path().join("server.xml");
    let artifact = ConfigArtifact::new("app.properties.j2", &target);

    let outcome = Materializer::new(&renderer, false)
        .materialize(&artifact, &Environment::default())
        .expect("permission problems are not fatal");

    assert_eq!(outcome, Materialized::Written(PermOutcome::PermissionDenied));
    assert_eq!(read(&target), "port=8085");
}

#[test]
fn unwritable_directory_is_skipped_and_generation_continues() {
    if nix::unistd::geteuid().is_root() {
        return;
    }
    let (dir, renderer) = setup();
    let (user, group) = current_names();
    let locked = dir.path().join("locked");
    std::fs::create_dir(&locked).expect("should create locked dir");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555))
        .expect("should lock dir");

    let artifacts = [
        ConfigArtifact::new("app.properties.j2", locked.join("denied.properties"))
            .owned_by(&user, &group),
        ConfigArtifact::new("app.properties.j2", dir.path().join("ok.properties"))
            .owned_by(&user, &group),
    ];
    let results = Materializer::new(&renderer, false)
        .materialize_all(&artifacts, &Environment::default())
        .expect("write denial is not fatal");

    assert_eq!(results[0].1, Materialized::WriteDenied);
    assert!(!locked.join("denied.properties").exists());
    assert_eq!(results[1].1, Materialized::Written(PermOutcome::Applied));
    assert_eq!(read(&dir.path().join("ok.properties")), "port=8085");

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))
        .expect("should unlock dir");
}
