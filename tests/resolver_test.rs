//! Integration tests for manifest loading and dependency ordering
//!
//! Loads package trees from disk through the manifest catalog and drives
//! the resolver the way the builder does.

mod common;

use common::TestProject;
use incubator::core::catalog::{ManifestDirs, ManifestSource, PackageEvent, PackageSet};
use incubator::core::package::PackageRequest;
use incubator::core::resolver::Order;
use incubator::error::{IncubatorError, ResolveError};
use std::cell::RefCell;

/// a@1.0.0, a@1.2.0, b@0.2.0(a), c@0.0.1(b, d, a@~1.0), d@0.1.0(a@~1.2)
fn diamond() -> TestProject {
    let project = TestProject::new();
    project.write_manifest("a", "1.0.0", "", "");
    project.write_manifest("a", "1.2.0", "", "");
    project.write_manifest("b", "0.2.0", "\"a\"", "");
    project.write_manifest("c", "0.0.1", "\"b\", \"d\", { a = \"~1.0\" }", "");
    project.write_manifest("d", "0.1.0", "{ a = \"~1.2\" }", "");
    project
}

fn load(project: &TestProject, names: &[&str]) -> Result<PackageSet, IncubatorError> {
    let catalog = ManifestDirs::new(vec![project.packages()]);
    let requests: Vec<PackageRequest> = names.iter().map(|name| name.parse().unwrap()).collect();
    PackageSet::load(&catalog, &requests, |_| {})
}

#[test]
fn test_versions_newest_first() {
    let project = diamond();
    let catalog = ManifestDirs::new(vec![project.packages()]);

    let versions: Vec<String> = catalog.versions("a").iter().map(ToString::to_string).collect();
    assert_eq!(versions, vec!["1.2.0", "1.0.0"]);
    assert!(catalog.versions("missing").is_empty());
}

#[test]
fn test_both_versions_of_a_are_loaded() {
    let project = diamond();
    let set = load(&project, &["c-0.0.1"]).unwrap();

    let mut names: Vec<String> = set.packages().map(|(_, p)| p.full_name()).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["a-1.0.0", "a-1.2.0", "b-0.2.0", "c-0.0.1", "d-0.1.0"]
    );
}

#[test]
fn test_diamond_order() {
    let project = diamond();
    let set = load(&project, &["c-0.0.1"]).unwrap();
    let mut order = Order::new(&set);

    let mut sequence = Vec::new();
    while !order.is_empty() {
        let batch = order.fetch_all();
        assert!(!batch.is_empty(), "resolver stalled");
        sequence.extend(batch.iter().map(|&id| set.get(id).full_name()));
        order.complete(&batch).unwrap();
    }

    assert_eq!(sequence.len(), 5);
    assert_eq!(&sequence[..2], &["a-1.2.0", "a-1.0.0"]);
    assert_eq!(sequence.last().map(String::as_str), Some("c-0.0.1"));
}

#[test]
fn test_load_emits_events_in_order() {
    let project = TestProject::new();
    project.write_manifest("lib", "1.0.0", "", "");
    project.write_manifest("app", "1.0.0", "\"lib\"", "");

    let catalog = ManifestDirs::new(vec![project.packages()]);
    let events = RefCell::new(Vec::new());
    PackageSet::load(&catalog, &["app".parse().unwrap()], |event| {
        events.borrow_mut().push(event);
    })
    .unwrap();

    let events = events.into_inner();
    assert!(matches!(&events[0], PackageEvent::Examine { request } if request == "app"));
    assert!(matches!(&events[1], PackageEvent::Loading { manifest, .. } if manifest.ends_with("app/1.0.0.toml")));
    assert!(matches!(&events[2], PackageEvent::Loaded { package } if package == "app-1.0.0"));
    assert!(matches!(&events[3], PackageEvent::Examine { request } if request == "lib"));
    assert_eq!(events.len(), 6);
}

#[test]
fn test_unsatisfiable_range_is_not_found() {
    let project = TestProject::new();
    project.write_manifest("a", "1.0.0", "", "");
    project.write_manifest("app", "1.0.0", "{ a = \"^2\" }", "");

    let error = load(&project, &["app"]).unwrap_err();
    assert!(matches!(
        error,
        IncubatorError::Resolve(ResolveError::NotFound { ref request }) if request.starts_with("a (")
    ));
}

#[test]
fn test_cycle_is_reported() {
    let project = TestProject::new();
    project.write_manifest("x", "1.0.0", "\"y\"", "");
    project.write_manifest("y", "1.0.0", "\"x\"", "");

    let set = load(&project, &["x"]).unwrap();
    let order = Order::new(&set);

    assert_eq!(order.ready(), 0);
    let error = order.ensure_progress().unwrap_err();
    assert!(matches!(error, ResolveError::CircularDependency { .. }));
}

#[tokio::test]
async fn test_each_surfaces_cycle() {
    let project = TestProject::new();
    project.write_manifest("base", "1.0.0", "", "");
    project.write_manifest("x", "1.0.0", "\"y\", \"base\"", "");
    project.write_manifest("y", "1.0.0", "\"x\"", "");

    let set = load(&project, &["x"]).unwrap();
    let mut order = Order::new(&set);
    let visited = RefCell::new(Vec::new());

    let result = order
        .each(2, |id| {
            visited.borrow_mut().push(set.get(id).full_name());
            async { Ok(()) }
        })
        .await;

    assert_eq!(visited.into_inner(), vec!["base-1.0.0"]);
    assert!(matches!(
        result,
        Err(IncubatorError::Resolve(ResolveError::CircularDependency { .. }))
    ));
}
