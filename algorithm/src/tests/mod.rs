use super::*;
use common::module_meta::ModuleDependency;

fn candidate(name: &str, deps: &[(&str, bool)], rdeps: &[(&str, bool)]) -> Candidate {
    Candidate {
        name: name.to_string(),
        meta: ModuleMeta {
            cxxflags: String::new(),
            ldflags: String::new(),
            dependencies: deps
                .iter()
                .map(|(module, optional)| ModuleDependency {
                    module: module.to_string(),
                    optional: *optional,
                })
                .collect(),
            reverse_dependencies: rdeps
                .iter()
                .map(|(module, optional)| ModuleDependency {
                    module: module.to_string(),
                    optional: *optional,
                })
                .collect(),
        },
    }
}

fn map(candidates: Vec<Candidate>) -> BTreeMap<String, Candidate> {
    candidates
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect()
}

fn requested(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_module_no_dependencies() {
    let candidates = map(vec![candidate("core", &[], &[])]);
    let resolution = resolve(&requested(&["core"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["core"]);
    assert!(resolution.skipped_optional.is_empty());
}

#[test]
fn forward_dependency_is_ordered_first() {
    let candidates = map(vec![
        candidate("network", &[("core", false)], &[]),
        candidate("core", &[], &[]),
    ]);
    let resolution = resolve(&requested(&["network"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["core", "network"]);
}

#[test]
fn missing_required_dependency_is_an_error() {
    let candidates = map(vec![candidate("network", &[("core", false)], &[])]);
    let err = resolve(&requested(&["network"]), &candidates).unwrap_err();
    assert_eq!(
        err,
        ResolveError::MissingDependency {
            module: "network".to_string(),
            missing: "core".to_string(),
        }
    );
}

#[test]
fn missing_optional_dependency_still_resolves() {
    let candidates = map(vec![candidate("client_file", &[("loader", true)], &[])]);
    let resolution = resolve(&requested(&["client_file"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["client_file"]);
    assert_eq!(
        resolution.skipped_optional,
        vec![SkippedOptional { module: "client_file".to_string(), missing: "loader".to_string() }]
    );
}

#[test]
fn present_optional_dependency_is_still_ordered_first() {
    let candidates = map(vec![
        candidate("client_file", &[("loader", true)], &[]),
        candidate("loader", &[], &[]),
    ]);
    let resolution = resolve(&requested(&["client_file"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["loader", "client_file"]);
    assert!(resolution.skipped_optional.is_empty());
}

// Scenario S4: {A, B, C}; A depends on C optionally; B declares a reverse
// dependency on A. With all three present the expected order is C, B, A
// (B is pulled in ahead of A because it reverse-depends on it, and C
// precedes A because A's optional dependency is actually available).
#[test]
fn reverse_dependency_and_optional_dependency_scenario_with_all_present() {
    let candidates = map(vec![
        candidate("a", &[("c", true)], &[]),
        candidate("b", &[], &[("a", false)]),
        candidate("c", &[], &[]),
    ]);
    let resolution = resolve(&requested(&["a"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["c", "b", "a"]);
    assert!(resolution.skipped_optional.is_empty());
}

// Same scenario with C absent from the candidate set entirely: A's
// optional dependency on C is simply skipped, giving order B, A, and the
// skip is reported so the caller can log a WARN naming C.
#[test]
fn reverse_dependency_and_optional_dependency_scenario_with_optional_missing() {
    let candidates = map(vec![
        candidate("a", &[("c", true)], &[]),
        candidate("b", &[], &[("a", false)]),
    ]);
    let resolution = resolve(&requested(&["a"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["b", "a"]);
    assert_eq!(
        resolution.skipped_optional,
        vec![SkippedOptional { module: "a".to_string(), missing: "c".to_string() }]
    );
}

#[test]
fn already_promised_reverse_dependency_is_not_requeued() {
    // b and c both reverse-depend on a; a has no other dependencies.
    // Requiring a should promise each of b, c exactly once regardless of
    // iteration order, and all three should resolve without duplicates.
    let candidates = map(vec![
        candidate("a", &[], &[]),
        candidate("b", &[], &[("a", false)]),
        candidate("c", &[], &[("a", false)]),
    ]);
    let order = resolve(&requested(&["a"]), &candidates).unwrap().order;
    assert_eq!(order.len(), 3);
    assert!(order.contains(&"a".to_string()));
    assert!(order.contains(&"b".to_string()));
    assert!(order.contains(&"c".to_string()));
}

#[test]
fn diamond_dependency_resolves_each_module_once() {
    let candidates = map(vec![
        candidate("top", &[("left", false), ("right", false)], &[]),
        candidate("left", &[("base", false)], &[]),
        candidate("right", &[("base", false)], &[]),
        candidate("base", &[], &[]),
    ]);
    let order = resolve(&requested(&["top"]), &candidates).unwrap().order;
    assert_eq!(order.len(), 4);
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("base") < pos("left"));
    assert!(pos("base") < pos("right"));
    assert!(pos("left") < pos("top"));
    assert!(pos("right") < pos("top"));
}

#[test]
fn resolution_order_is_deterministic_across_runs() {
    let candidates = map(vec![
        candidate("top", &[("left", false), ("right", false)], &[]),
        candidate("left", &[("base", false)], &[]),
        candidate("right", &[("base", false)], &[]),
        candidate("base", &[], &[]),
    ]);
    let first = resolve(&requested(&["top"]), &candidates).unwrap();
    let second = resolve(&requested(&["top"]), &candidates).unwrap();
    assert_eq!(first, second);
}

#[test]
fn unrequested_candidate_is_left_out_of_the_result() {
    let candidates = map(vec![
        candidate("core", &[], &[]),
        candidate("unused", &[], &[]),
    ]);
    let resolution = resolve(&requested(&["core"]), &candidates).unwrap();
    assert_eq!(resolution.order, vec!["core"]);
}
