//! End-to-end resolution against an in-memory cluster.

use std::sync::Arc;

use mantle::template::Value;
use mantle::{
    Config, ExecutionErrorKind, InputFormat, LookupError, MemoryCluster, ObjectIdentifier,
    ResolveOptions, Resolver, TemplateError, TemplateFunction, ValidationError,
};
use serde::Serialize;
use serde_json::json;

// ============================================================================
// Test helpers
// ============================================================================

fn cluster() -> MemoryCluster {
    MemoryCluster::new()
        .with_secret("testns", "testsecret", [("secretkey1", "secretkey1Val")])
        .with_config_map("testns", "testconfigmap", [("cmkey1", "cmkey1Val"), ("replicas", "3")])
        .with_config_map("testns", "multiline", [("config", "a: 1\nb: 2")])
}

fn resolver_with(config: Config) -> Resolver {
    Resolver::builder()
        .with_store(Arc::new(cluster()))
        .with_config(config)
        .build()
        .unwrap()
}

fn resolver() -> Resolver {
    resolver_with(Config::default())
}

fn resolve(raw: &str, context: serde_json::Value) -> Result<mantle::TemplateResult, TemplateError> {
    resolver().resolve_template(raw, &context, &ResolveOptions::new())
}

fn execution_kind(err: &TemplateError) -> Option<ExecutionErrorKind> {
    match err {
        TemplateError::Execution(err) => Some(err.kind()),
        _ => None,
    }
}

// ============================================================================
// Typed values
// ============================================================================

#[test]
fn to_int_produces_an_integer() {
    let result = resolve("key: '{{ \"6\" | toInt }}'\n", json!({})).unwrap();
    assert_eq!(result.resolved, json!({"key": 6}));
}

#[test]
fn to_bool_produces_a_boolean() {
    let result = resolve("enabled: '{{ \"true\" | toBool }}'\n", json!({})).unwrap();
    assert_eq!(result.resolved, json!({"enabled": true}));
}

#[test]
fn to_literal_produces_structure() {
    let result = resolve("items: '{{ \"[1, 2]\" | toLiteral }}'\n", json!({})).unwrap();
    assert_eq!(result.resolved, json!({"items": [1, 2]}));
}

#[test]
fn typed_values_in_list_items() {
    let raw = "ports:\n  - \"{{ port | toInt }}\"\n  - '{{ 8443 }}'\n";
    let result = resolve(raw, json!({"port": "8080"})).unwrap();
    assert_eq!(result.resolved, json!({"ports": [8080, "8443"]}));
}

#[test]
fn config_map_value_coerced_to_int() {
    let raw = "replicas: '{{ fromConfigMap(\"testns\", \"testconfigmap\", \"replicas\") | toInt }}'\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(result.resolved, json!({"replicas": 3}));
    assert!(!result.has_sensitive_data);
}

// ============================================================================
// Object helpers
// ============================================================================

#[test]
fn from_secret_returns_base64_and_marks_sensitive() {
    let raw = "password: '{{ fromSecret(\"testns\", \"testsecret\", \"secretkey1\") }}'\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(result.resolved, json!({"password": "c2VjcmV0a2V5MVZhbA=="}));
    assert!(result.has_sensitive_data);
    assert_eq!(
        result.referenced_objects,
        vec![ObjectIdentifier::new("v1", "Secret", "testns", "testsecret")]
    );
}

#[test]
fn from_secret_missing_key_is_empty() {
    let raw = "v: '{{ fromSecret(\"testns\", \"testsecret\", \"nokey\") }}'\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(result.resolved, json!({"v": ""}));
}

#[test]
fn from_secret_missing_object_fails_with_line() {
    let raw = "a: 1\nb: '{{ fromSecret(\"testns\", \"nosuchsecret\", \"k\") }}'\n";
    let err = resolve(raw, json!({})).unwrap_err();
    assert_eq!(
        err.lookup_error(),
        Some(&LookupError::not_found("Secret", "testns", "nosuchsecret"))
    );
    let TemplateError::Execution(err) = err else {
        panic!("expected an execution error")
    };
    assert_eq!(err.kind(), ExecutionErrorKind::FunctionFailed);
    assert_eq!(err.function(), Some("fromSecret"));
    assert_eq!(err.line(), Some(2));
}

#[test]
fn copy_config_map_data_inlines_a_map() {
    let raw = "data: '{{ copyConfigMapData(\"testns\", \"testconfigmap\") }}'\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(
        result.resolved,
        json!({"data": {"cmkey1": "cmkey1Val", "replicas": "3"}})
    );
}

#[test]
fn copy_secret_data_keeps_base64_values() {
    let raw = "data: '{{ copySecretData(\"testns\", \"testsecret\") }}'\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(
        result.resolved,
        json!({"data": {"secretkey1": "c2VjcmV0a2V5MVZhbA=="}})
    );
    assert!(result.has_sensitive_data);
}

#[test]
fn autoindent_follows_the_expression_column() {
    let raw = "config: |\n  {{ fromConfigMap(\"testns\", \"multiline\", \"config\") | autoindent }}\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(result.resolved, json!({"config": "a: 1\nb: 2\n"}));
}

// ============================================================================
// Context
// ============================================================================

#[derive(Serialize)]
struct PolicyContext {
    name: String,
    replicas: u32,
    labels: Vec<String>,
}

#[test]
fn struct_context_is_accepted() {
    let context = PolicyContext {
        name: "web".into(),
        replicas: 2,
        labels: vec!["a".into(), "b".into()],
    };
    let raw = "name: '{{ name }}'\ncount: '{{ replicas | toInt }}'\nfirst: '{{ labels[0] }}'\n";
    let result = resolver()
        .resolve_template(raw, &context, &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"name": "web", "count": 2, "first": "a"}));
}

#[test]
fn unit_context_means_empty() {
    let result = resolver()
        .resolve_template("v: '{{ missing }}'\n", &(), &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"v": ""}));
}

#[test]
fn null_inside_context_is_rejected() {
    let err = resolve("v: '{{ a }}'\n", json!({"a": null})).unwrap_err();
    assert!(matches!(
        err,
        TemplateError::Validation(ValidationError::InvalidContext(_))
    ));
}

#[test]
fn non_map_context_is_rejected() {
    let err = resolver()
        .resolve_template("v: 1\n", &vec![1, 2], &ResolveOptions::new())
        .unwrap_err();
    assert!(matches!(
        err,
        TemplateError::Validation(ValidationError::InvalidContext(_))
    ));
}

// ============================================================================
// Documents without expressions and input formats
// ============================================================================

#[test]
fn document_without_expressions_round_trips() {
    let raw = "kind: ConfigMap\ndata:\n  a: '1'\n  b: [x, y]\n";
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(
        result.resolved,
        json!({"kind": "ConfigMap", "data": {"a": "1", "b": ["x", "y"]}})
    );
    assert!(result.referenced_objects.is_empty());
    assert!(!result.has_sensitive_data);
    assert!(!result.missing_api_resource);
}

#[test]
fn json_input_is_resolved() {
    let raw = r#"{"data": {"n": "{{ \"3\" | toInt }}", "s": "{{ name }}"}}"#;
    let options = ResolveOptions::new().with_input_format(InputFormat::Json);
    let result = resolver()
        .resolve_template(raw, &json!({"name": "web"}), &options)
        .unwrap();
    assert_eq!(result.resolved, json!({"data": {"n": 3, "s": "web"}}));
}

#[test]
fn invalid_json_input_is_a_parse_error() {
    let options = ResolveOptions::new().with_input_format(InputFormat::Json);
    let err = resolver()
        .resolve_template("{\"a\": ", &json!({}), &options)
        .unwrap_err();
    assert!(matches!(err, TemplateError::Parse(mantle::ParseError::Json(_))));
}

#[test]
fn invalid_output_is_a_yaml_error() {
    let err = resolve("a: {{ \"[1, 2\" }}\n", json!({})).unwrap_err();
    assert!(matches!(err, TemplateError::Parse(mantle::ParseError::Yaml(_))));
}

#[test]
fn syntax_error_reports_line() {
    let err = resolve("a: 1\nb: '{{ name | }}'\n", json!({"name": "x"})).unwrap_err();
    match err {
        TemplateError::Parse(mantle::ParseError::Syntax { line, .. }) => assert_eq!(line, Some(2)),
        other => panic!("unexpected {other:?}"),
    }
}

// ============================================================================
// Delimiters
// ============================================================================

#[test]
fn hub_expressions_survive_the_default_pass() {
    let raw = "a: '{{hub name hub}}'\nb: '{{ name }}'\n";
    let result = resolve(raw, json!({"name": "web"})).unwrap();
    assert_eq!(result.resolved, json!({"a": "{{hub name hub}}", "b": "web"}));
}

#[test]
fn hub_delimiters_leave_managed_expressions() {
    let raw = "a: '{{hub name hub}}'\nb: '{{ name }}'\n";
    let result = resolver_with(Config::hub())
        .resolve_template(raw, &json!({"name": "web"}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"a": "web", "b": "{{ name }}"}));
}

#[test]
fn hub_pass_skips_documents_with_only_managed_expressions() {
    let raw = "a: '{{ fromSecret(\"testns\", \"testsecret\", \"secretkey1\") }}'\n";
    let result = resolver_with(Config::hub())
        .resolve_template(raw, &json!({}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(
        result.resolved,
        json!({"a": "{{ fromSecret(\"testns\", \"testsecret\", \"secretkey1\") }}"})
    );
    assert!(result.referenced_objects.is_empty());
}

#[test]
fn hub_filter_expression_depends_on_the_pass() {
    let raw = "a: '{{hub \"x\" | base64enc hub}}'\n";
    let managed = resolve(raw, json!({})).unwrap();
    assert_eq!(managed.resolved, json!({"a": "{{hub \"x\" | base64enc hub}}"}));

    let hub = resolver_with(Config::hub())
        .resolve_template(raw, &json!({}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(hub.resolved, json!({"a": "eA=="}));
}

#[test]
fn literal_comment_opener_passes_through() {
    let raw = "script: 'echo ${#arr[@]}'\nname: '{{ name }}'\n";
    let result = resolve(raw, json!({"name": "web"})).unwrap();
    assert_eq!(
        result.resolved,
        json!({"script": "echo ${#arr[@]}", "name": "web"})
    );
}

#[test]
fn literal_block_opener_passes_through() {
    let raw = "msg: 'use {% here'\nname: '{{ name }}'\n";
    let result = resolve(raw, json!({"name": "web"})).unwrap();
    assert_eq!(result.resolved, json!({"msg": "use {% here", "name": "web"}));
}

#[test]
fn block_tags_and_comments_still_apply() {
    let raw = "{# replicas only when enabled #}\n{% if on %}a: 1\n{% endif %}b: '{{ name }}'\n";
    let result = resolve(raw, json!({"on": true, "name": "web"})).unwrap();
    assert_eq!(result.resolved, json!({"a": 1, "b": "web"}));

    let result = resolve(raw, json!({"on": false, "name": "web"})).unwrap();
    assert_eq!(result.resolved, json!({"b": "web"}));
}

#[test]
fn typed_values_with_hub_delimiters() {
    let raw = "n: '{{hub \"7\" | toInt hub}}'\n";
    let result = resolver_with(Config::hub())
        .resolve_template(raw, &json!({}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"n": 7}));
}

// ============================================================================
// Function registry
// ============================================================================

#[test]
fn unknown_function_is_reported() {
    let err = resolve("a: '{{ nosuchfunction() }}'\n", json!({})).unwrap_err();
    assert_eq!(execution_kind(&err), Some(ExecutionErrorKind::UndefinedFunction));
}

#[test]
fn denylisted_function_fails() {
    let options = ResolveOptions::new().with_denylisted_functions(["fromConfigMap"]);
    let raw = "a: '{{ fromConfigMap(\"testns\", \"testconfigmap\", \"cmkey1\") }}'\n";
    let err = resolver()
        .resolve_template(raw, &json!({}), &options)
        .unwrap_err();
    assert_eq!(execution_kind(&err), Some(ExecutionErrorKind::Denylisted));
}

#[test]
fn environment_functions_are_always_denylisted() {
    for raw in ["a: '{{ env(\"HOME\") }}'\n", "a: '{{ expandenv(\"$HOME\") }}'\n"] {
        let err = resolve(raw, json!({})).unwrap_err();
        assert_eq!(execution_kind(&err), Some(ExecutionErrorKind::Denylisted));
    }
}

#[test]
fn disabled_function_is_undefined() {
    let config = Config {
        disabled_functions: vec!["base64enc".into()],
        ..Config::default()
    };
    let err = resolver_with(config)
        .resolve_template("a: '{{ base64enc(\"x\") }}'\n", &json!({}), &ResolveOptions::new())
        .unwrap_err();
    assert_eq!(execution_kind(&err), Some(ExecutionErrorKind::UndefinedFunction));
}

#[test]
fn custom_function_is_callable_and_pipeable() {
    let greet = TemplateFunction::new(|args: &[Value]| {
        let name = args.first().and_then(Value::as_str).unwrap_or("nobody");
        Ok(Value::from(format!("hello {}", name)))
    });
    let options = ResolveOptions::new().with_custom_function("greet", greet);
    let raw = "a: '{{ greet(\"web\") }}'\nb: '{{ \"db\" | greet }}'\n";
    let result = resolver()
        .resolve_template(raw, &json!({}), &options)
        .unwrap();
    assert_eq!(result.resolved, json!({"a": "hello web", "b": "hello db"}));
}

#[test]
fn custom_function_overrides_builtin() {
    let options = ResolveOptions::new()
        .with_custom_function("fromSecret", TemplateFunction::new(|_| Ok(Value::from("stub"))));
    let raw = "a: '{{ fromSecret(\"testns\", \"testsecret\", \"secretkey1\") }}'\n";
    let result = resolver()
        .resolve_template(raw, &json!({}), &options)
        .unwrap();
    assert_eq!(result.resolved, json!({"a": "stub"}));
    assert!(!result.has_sensitive_data);
}

#[test]
fn utility_functions_are_available() {
    let raw = concat!(
        "a: '{{ trimPrefix(\"web-app\", \"web-\") }}'\n",
        "b: '{{ \"a,b\" | splitList(\",\") | length }}'\n",
        "c: '{{ ternary(true, \"yes\", \"no\") }}'\n",
        "d: '{{ \"hello\" | base64enc | base64dec }}'\n",
    );
    let result = resolve(raw, json!({})).unwrap();
    assert_eq!(
        result.resolved,
        json!({"a": "app", "b": "2", "c": "yes", "d": "hello"})
    );
}

#[test]
fn oversized_repetition_fails_instead_of_panicking() {
    let err = resolve("a: '{{ repeat(\"ab\", n) }}'\n", json!({"n": i64::MAX})).unwrap_err();
    assert_eq!(execution_kind(&err), Some(ExecutionErrorKind::FunctionFailed));

    let result = resolve("a: '{{ trunc(\"abc\", n) }}'\n", json!({"n": i64::MIN})).unwrap();
    assert_eq!(result.resolved, json!({"a": "abc"}));
}

#[test]
fn resolutions_are_independent() {
    let resolver = resolver();
    let first = resolver
        .resolve_template(
            "a: '{{ fromSecret(\"testns\", \"testsecret\", \"secretkey1\") }}'\n",
            &json!({}),
            &ResolveOptions::new(),
        )
        .unwrap();
    let second = resolver
        .resolve_template("a: '{{ 1 }}'\n", &json!({}), &ResolveOptions::new())
        .unwrap();
    assert!(first.has_sensitive_data);
    assert!(!second.has_sensitive_data);
    assert!(second.referenced_objects.is_empty());
}
