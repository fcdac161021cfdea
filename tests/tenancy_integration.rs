//! End-to-end tests across provisioning, routing, cataloguing, execution and
//! search-path binding, using the in-memory backends.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use schemata::testing::{
    AdminCall, MemoryTenantStore, RecordingAdmin, RecordingMigrationRunner, RecordingTarget,
};
use schemata::{
    BindingState, CommandExecutor, DomainResolver, ExecutionMode, ExecutorConfig, LifecycleEvent,
    NewDomain, RequestInfo, Resolution, Resolver, ResolverChain, Schema, SchemaManager,
    SchemaSelection, SearchPathBinder, TenancyConfig, TenantCatalog, TenantProvisioner,
    TenantStore, command_fn, context, with_schema,
};

const CONFIG: &str = r#"
    [tenancy]
    extra_search_paths = ["shared"]

    [tenancy.tenants.www]
    domains = ["example.com"]
    header_key = "www"

    [tenancy.dynamic]
    clone_reference = "sample"
"#;

struct Deployment {
    config: Arc<TenancyConfig>,
    store: Arc<MemoryTenantStore>,
    admin: Arc<RecordingAdmin>,
    runner: Arc<RecordingMigrationRunner>,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    provisioner: TenantProvisioner,
}

fn deployment() -> Deployment {
    let config = Arc::new(TenancyConfig::from_toml_str(CONFIG).unwrap());
    let store = Arc::new(MemoryTenantStore::new());
    let admin = Arc::new(RecordingAdmin::new());
    admin.add_schema("sample");
    let runner = Arc::new(RecordingMigrationRunner::new());

    let manager = SchemaManager::new(admin.clone(), runner.clone())
        .with_clone_reference(config.clone_reference().cloned());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.on_event(move |event| sink.lock().unwrap().push(event.clone()));

    let provisioner = TenantProvisioner::new(store.clone() as Arc<dyn TenantStore>, manager);
    Deployment {
        config,
        store,
        admin,
        runner,
        events,
        provisioner,
    }
}

#[tokio::test]
async fn test_provisioned_tenant_is_routable() {
    let d = deployment();
    d.provisioner
        .create_tenant(
            "acme",
            vec![
                NewDomain::new("tenants.example.com").with_folder("acme").primary(),
                NewDomain::new("acme.com").redirecting(),
            ],
        )
        .await
        .unwrap();

    // Cloned from the reference, not created and migrated.
    assert!(d.admin.has_schema("acme"));
    assert!(d.admin.calls().iter().any(|call| matches!(
        call,
        AdminCall::Clone { source, dest, dry_run: false } if source == "sample" && dest == "acme"
    )));
    assert!(d.runner.applied().is_empty());
    assert!(
        d.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, LifecycleEvent::Cloned { .. }))
    );

    let chain = ResolverChain::new(d.config.clone())
        .with_store(d.store.clone())
        .with_resolver(Resolver::Domain(DomainResolver::new()))
        .with_resolver(Resolver::Header);

    let resolved = chain
        .resolve(&RequestInfo::new("tenants.example.com", "/acme/orders"))
        .await
        .unwrap();
    let Resolution::Activate(schema) = resolved else {
        panic!("expected activation, got {resolved:?}");
    };
    assert_eq!(schema.name().as_str(), "acme");
    assert_eq!(schema.folder(), Some("acme"));

    let redirect = chain
        .resolve(&RequestInfo::new("acme.com", "/orders").with_secure(true))
        .await
        .unwrap();
    assert_eq!(
        redirect,
        Resolution::Redirect {
            location: "https://tenants.example.com/acme/orders".to_string()
        }
    );

    let header = chain
        .resolve(&RequestInfo::new("example.com", "/").with_header("X-Tenant", "www"))
        .await
        .unwrap();
    assert!(matches!(header, Resolution::Activate(s) if s.name().as_str() == "www"));
}

#[tokio::test]
async fn test_catalog_order_and_execution() {
    let d = deployment();
    for name in ["beta", "alpha"] {
        d.provisioner.create_tenant(name, Vec::new()).await.unwrap();
    }

    let catalog = TenantCatalog::new(d.config.clone()).with_store(d.store.clone());
    let schemas = catalog.collect(&SchemaSelection::all()).await.unwrap();
    let names: Vec<&str> = schemas.iter().map(|s| s.name().as_str()).collect();
    // public, static tenants, clone reference, then dynamic tenants by id.
    assert_eq!(names, vec!["public", "www", "sample", "beta", "alpha"]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let command = Arc::new(command_fn("record", move |schema: Schema| {
        let sink = sink.clone();
        async move {
            assert_eq!(context::current(), schema);
            sink.lock().unwrap().push(schema.name().to_string());
            Ok(())
        }
    }));

    let selection = SchemaSelection::parse(&[":dynamic:"], &["alpha"]).unwrap();
    let dynamic = catalog.collect(&selection).await.unwrap();
    let report = CommandExecutor::new(ExecutorConfig::default().with_max_workers(2))
        .run(dynamic, command, ExecutionMode::Sequential { abort_on_failure: true })
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(*seen.lock().unwrap(), vec!["beta".to_string()]);
    assert!(context::current().is_public());
}

#[tokio::test]
async fn test_binding_follows_context() {
    let config = TenancyConfig::from_toml_str(CONFIG).unwrap();
    let binder = SearchPathBinder::new(config.search_path_config());
    let mut state = BindingState::new();
    let mut target = RecordingTarget::new();

    with_schema(Schema::parse("acme").unwrap(), async {
        assert!(binder.bind_current(&mut state, &mut target).await.unwrap());
        assert!(!binder.bind_current(&mut state, &mut target).await.unwrap());
    })
    .await;
    assert!(binder.bind_current(&mut state, &mut target).await.unwrap());

    // A rolled back transaction forgets the applied path.
    state.on_rollback();
    assert!(binder.bind_current(&mut state, &mut target).await.unwrap());

    assert_eq!(
        target.applied(),
        vec![r#""acme", "public", "shared""#, r#""public""#, r#""public""#]
    );
}

#[tokio::test]
async fn test_delete_tenant_drops_namespace() {
    let d = deployment();
    d.provisioner.create_tenant("acme", Vec::new()).await.unwrap();
    d.provisioner.delete_tenant("acme").await.unwrap();

    assert!(!d.admin.has_schema("acme"));
    assert!(d.store.find_by_schema_name("acme").await.unwrap().is_none());
    let events = d.events.lock().unwrap();
    let pre_drop = events.iter().position(|e| matches!(e, LifecycleEvent::PreDrop(_)));
    let dropped = events.iter().position(|e| matches!(e, LifecycleEvent::Dropped(_)));
    assert!(pre_drop.unwrap() < dropped.unwrap());
}
