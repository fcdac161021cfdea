//! Integration tests for configuration parsing and handling.
//!
//! These tests verify that the `[tenancy]` section of `schemata.toml` is
//! parsed and validated as a whole.

use schemata::{SchemaName, TenancyConfig, TenancyError};

/// Test minimal configuration
#[test]
fn test_config_minimal() {
    let config = TenancyConfig::from_toml_str("").expect("Failed to parse config");
    assert!(config.tenants.is_empty());
    assert!(!config.has_dynamic());
    assert_eq!(config.header, "x-tenant");
    assert_eq!(config.session_key, "tenant");
}

/// Test full configuration with all options
#[test]
fn test_config_full() {
    let config_str = r#"
        [tenancy]
        extra_search_paths = ["shared"]
        always_apply_search_path = true
        session_key = "site"
        header = "x-site"
        batch_size = 50

        [tenancy.tenants.public]
        domains = ["localhost"]

        [tenancy.tenants.www]
        domains = ["example.com", "www.example.com"]
        fallback_domains = ["example.org"]
        session_key = "www"
        header_key = "www"
        urlconf = "www_urls"

        [tenancy.dynamic]
        tenants_table = "tenants"
        domains_table = "domains"
        clone_reference = "sample"
        urlconf = "tenant_urls"

        [database]
        url = "postgresql://localhost/app"
    "#;

    let config = TenancyConfig::from_toml_str(config_str).expect("Failed to parse config");

    let names: Vec<&str> = config.tenants.keys().map(SchemaName::as_str).collect();
    assert_eq!(names, vec!["public", "www"]);
    assert_eq!(config.batch_size, 50);
    assert!(config.always_apply_search_path);
    assert_eq!(config.clone_reference().map(SchemaName::as_str), Some("sample"));
    assert_eq!(config.dynamic_urlconf(), Some("tenant_urls"));
    assert_eq!(config.find_by_header_key("www").map(|(n, _)| n.as_str()), Some("www"));
    assert_eq!(
        config.find_by_fallback_domain("example.org").map(|(n, _)| n.as_str()),
        Some("www")
    );
}

/// Declaration order is iteration order
#[test]
fn test_config_tenant_order() {
    let config = TenancyConfig::from_toml_str(
        r#"
        [tenancy.tenants.zeta]
        [tenancy.tenants.alpha]
        [tenancy.tenants.mid]
        "#,
    )
    .unwrap();
    let names: Vec<&str> = config.tenants.keys().map(SchemaName::as_str).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

/// Test invalid schema names are rejected while parsing
#[test]
fn test_config_invalid_names() {
    for source in [
        "[tenancy.tenants.pg_temp]",
        "[tenancy.tenants.\"bad-name\"]",
        "[tenancy]\nextra_search_paths = [\"1shared\"]",
        "[tenancy.dynamic]\nclone_reference = \"pg_sample\"",
    ] {
        let err = TenancyConfig::from_toml_str(source).unwrap_err();
        assert!(matches!(err, TenancyError::Config(_)), "{source}: {err:?}");
    }
}

/// Test cross-field validation
#[test]
fn test_config_validation() {
    let reserved = TenancyConfig::from_toml_str("[tenancy.tenants.default]");
    assert!(reserved.is_err());

    let duplicate = TenancyConfig::from_toml_str(
        r#"
        [tenancy.tenants.www]
        domains = ["example.com"]
        [tenancy.tenants.blog]
        domains = ["Example.com"]
        "#,
    );
    assert!(duplicate.is_err());

    let collision = TenancyConfig::from_toml_str(
        r#"
        [tenancy.tenants.sample]
        [tenancy.dynamic]
        clone_reference = "sample"
        "#,
    );
    assert!(collision.is_err());
}

/// Test the search path derived from configuration
#[test]
fn test_config_search_path() {
    let config = TenancyConfig::from_toml_str(
        r#"
        [tenancy]
        extra_search_paths = ["shared", "extensions"]
        "#,
    )
    .unwrap();
    let search_path = config.search_path_config();
    let acme = schemata::Schema::parse("acme").unwrap();
    assert_eq!(
        schemata::compute_search_path(&acme, &search_path),
        r#""acme", "public", "shared", "extensions""#
    );
    assert_eq!(
        schemata::compute_search_path(&schemata::Schema::public(), &search_path),
        r#""public""#
    );
}
