use super::*;
use std::fs;
use tempfile::TempDir;

/// Lays out a `modules_path`/`builtin_modules_path` pair as temp
/// directories and writes `meta.txt` (plus an optional `client_data/`
/// file) for each named module.
struct Fixture {
    _root: TempDir,
    modules_path: PathBuf,
    builtin_modules_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let modules_path = root.path().join("modules");
        let builtin_modules_path = root.path().join("builtin_modules");
        fs::create_dir_all(&modules_path).unwrap();
        fs::create_dir_all(&builtin_modules_path).unwrap();
        Fixture { _root: root, modules_path, builtin_modules_path }
    }

    fn write_module(&self, builtin: bool, name: &str, meta_json: &str) -> PathBuf {
        let base = if builtin { &self.builtin_modules_path } else { &self.modules_path };
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("meta.txt"), meta_json).unwrap();
        dir
    }

    fn host(&self) -> Host {
        Host::new(
            self.modules_path.to_str().unwrap().to_string(),
            self.builtin_modules_path.to_str().unwrap().to_string(),
        )
    }
}

fn noop_ctor() -> ModuleConstructor {
    struct Noop;
    impl Module for Noop {
        fn event(&mut self, _event_type: EventType, _payload: Payload) {}
    }
    Arc::new(|_h: Host, _p: String| -> Box<dyn Module> { Box::new(Noop) })
}

fn registry_with(names: &[&str]) -> Registry {
    let mut registry = Registry::new();
    for name in names {
        let name = name.to_string();
        registry.register(&name, move |_h: Host, _p: String| -> Box<dyn Module> {
            struct Noop;
            impl Module for Noop {
                fn event(&mut self, _event_type: EventType, _payload: Payload) {}
            }
            Box::new(Noop)
        });
    }
    registry
}

#[test]
fn loads_a_modules_path_entry_and_its_builtin_dependency_in_order() {
    let fx = Fixture::new();
    fx.write_module(false, "game", r#"{"dependencies": [{"module": "network"}]}"#);
    fx.write_module(true, "network", "{}");

    let host = fx.host();
    let registry = registry_with(&["game", "network", "loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));

    host.emit_named(EVENT_START, Arc::new(()));
    host.handle_events().unwrap();

    let loaded = host.get_loaded_modules();
    assert!(loaded.contains(&"network".to_string()));
    assert!(loaded.contains(&"game".to_string()));
    let network_pos = loaded.iter().position(|n| n == "network").unwrap();
    let game_pos = loaded.iter().position(|n| n == "game").unwrap();
    assert!(network_pos < game_pos, "network must load before its dependent game");
}

#[test]
fn missing_required_dependency_triggers_shutdown() {
    let fx = Fixture::new();
    fx.write_module(false, "game", r#"{"dependencies": [{"module": "nonexistent"}]}"#);

    let host = fx.host();
    let registry = registry_with(&["game", "loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));

    host.emit_named(EVENT_START, Arc::new(()));
    let err = host.handle_events().unwrap_err();
    match err {
        module_core::HostError::Shutdown { exit_status, .. } => assert_eq!(exit_status, 1),
        other => panic!("expected Shutdown, got {other:?}"),
    }
}

// Scenario S4's missing-optional-dependency case, exercised through the
// loader end to end: an optional dependency that is never discovered on
// disk does not block the module that declared it (algorithm's
// `Resolution::skipped_optional` is what the loader logs a WARN from).
#[test]
fn missing_optional_dependency_does_not_block_loading() {
    let fx = Fixture::new();
    fx.write_module(false, "game", r#"{"dependencies": [{"module": "editor", "optional": true}]}"#);

    let host = fx.host();
    let registry = registry_with(&["game", "loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));

    host.emit_named(EVENT_START, Arc::new(()));
    host.handle_events().unwrap();

    assert!(host.get_loaded_modules().contains(&"game".to_string()));
}

#[test]
fn module_without_a_linked_constructor_triggers_shutdown() {
    let fx = Fixture::new();
    fx.write_module(false, "game", "{}");

    let host = fx.host();
    // "game" is discoverable on disk but never registered in the Registry.
    let registry = registry_with(&["loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));

    host.emit_named(EVENT_START, Arc::new(()));
    let err = host.handle_events().unwrap_err();
    assert!(matches!(err, module_core::HostError::Shutdown { exit_status: 1, .. }));
}

#[test]
fn client_data_files_are_published_under_module_name_prefixed_paths() {
    let fx = Fixture::new();
    let game_dir = fx.write_module(false, "game", "{}");
    let client_data = game_dir.join("client_data");
    fs::create_dir_all(client_data.join("textures")).unwrap();
    fs::write(client_data.join("textures").join("wall.png"), b"pretend png bytes").unwrap();

    let host = fx.host();
    host.load_module(
        "client_file",
        "builtin_modules/client_file",
        client_file::constructor(),
    );
    let registry = registry_with(&["game", "loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));

    host.emit_named(EVENT_START, Arc::new(()));
    host.handle_events().unwrap();

    let catalog = host
        .access_module("client_file", |m| m.get_interface())
        .flatten()
        .unwrap()
        .downcast::<ClientFileInterface>()
        .ok()
        .unwrap();
    assert_eq!(catalog.file_names(), vec!["game/textures/wall.png".to_string()]);
}

#[test]
fn module_modified_reloads_the_named_module_but_never_the_loader_itself() {
    let fx = Fixture::new();
    fx.write_module(false, "game", "{}");

    let host = fx.host();
    let registry = registry_with(&["game", "loader"]);
    host.load_module("loader", "builtin_modules/loader", constructor(registry));
    host.load_module("game", "modules/game", noop_ctor());

    let loaded_before = host.get_loaded_modules();
    assert!(loaded_before.contains(&"game".to_string()));

    host.emit_named(
        EVENT_MODULE_MODIFIED,
        Arc::new(ModuleModified { name: "game".to_string(), path: "modules/game".to_string() }),
    );
    host.handle_events().unwrap();

    // still loaded (unload + reload, not removal)
    assert!(host.get_loaded_modules().contains(&"game".to_string()));

    // reloading "loader" itself is explicitly ignored
    host.emit_named(
        EVENT_MODULE_MODIFIED,
        Arc::new(ModuleModified { name: "loader".to_string(), path: "builtin_modules/loader".to_string() }),
    );
    host.handle_events().unwrap();
    assert!(host.get_loaded_modules().contains(&"loader".to_string()));
}

#[test]
fn required_modules_excludes_the_reserved_loader_scratch_directory() {
    let fx = Fixture::new();
    fx.write_module(false, "game", "{}");
    fs::create_dir_all(fx.modules_path.join(RESERVED_DIR)).unwrap();

    let required = required_modules(fx.modules_path.to_str().unwrap());
    assert_eq!(required, BTreeSet::from(["game".to_string()]));
}
