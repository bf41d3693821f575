//! Property-based tests for resolution using proptest.

use std::collections::BTreeMap;
use std::sync::Arc;

use mantle::{
    has_template, ClusterScopedObjectIdentifier, LookupError, MemoryCluster, ResolveOptions,
    Resolver,
};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test helpers
// ============================================================================

fn resolver() -> Resolver {
    let cluster = MemoryCluster::new()
        .with_config_map("allowed", "settings", [("mode", "fast")])
        .with_config_map("elsewhere", "settings", [("mode", "slow")]);
    Resolver::builder()
        .with_store(Arc::new(cluster))
        .build()
        .unwrap()
}

fn plain_document() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 .,-]{0,16}", 0..8)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn documents_without_expressions_round_trip(doc in plain_document()) {
        let raw = serde_yaml::to_string(&doc).unwrap();
        prop_assume!(!has_template(&raw, "", true));

        let result = resolver()
            .resolve_template(&raw, &json!({}), &ResolveOptions::new())
            .unwrap();
        prop_assert_eq!(result.resolved, serde_json::to_value(&doc).unwrap());
        prop_assert!(result.referenced_objects.is_empty());
    }

    #[test]
    fn to_int_round_trips_integers(n in any::<i64>()) {
        let raw = format!("n: '{{{{ \"{}\" | toInt }}}}'\n", n);
        let result = resolver()
            .resolve_template(&raw, &json!({}), &ResolveOptions::new())
            .unwrap();
        prop_assert_eq!(result.resolved, json!({"n": n}));
    }

    #[test]
    fn context_strings_render_verbatim(s in "[a-zA-Z0-9 ]{0,24}") {
        let result = resolver()
            .resolve_template("v: '{{ value }}'\n", &json!({"value": s.clone()}), &ResolveOptions::new())
            .unwrap();
        prop_assert_eq!(result.resolved, json!({"v": s}));
    }

    #[test]
    fn restricted_namespace_only_admits_itself(namespace in "[a-z]{1,12}") {
        let options = ResolveOptions::new().with_lookup_namespace("allowed");
        let raw = format!("m: '{{{{ fromConfigMap(\"{}\", \"settings\", \"mode\") }}}}'\n", namespace);
        let outcome = resolver().resolve_template(&raw, &json!({}), &options);

        if namespace == "allowed" {
            prop_assert_eq!(outcome.unwrap().resolved, json!({"m": "fast"}));
        } else {
            let err = outcome.unwrap_err();
            let is_restricted = matches!(
                err.lookup_error(),
                Some(LookupError::RestrictedNamespace { .. })
            );
            prop_assert!(is_restricted);
        }
    }

    #[test]
    fn wildcard_allowlist_fields_match_anything(
        group in "[a-z.]{0,12}",
        kind in "[A-Z][a-zA-Z]{0,10}",
        name in "[a-z0-9-]{0,12}",
    ) {
        prop_assert!(ClusterScopedObjectIdentifier::new("*", "*", "*").matches(&group, &kind, &name));
        prop_assert!(ClusterScopedObjectIdentifier::new(group.clone(), kind.clone(), "*").matches(&group, &kind, &name));
        prop_assert!(ClusterScopedObjectIdentifier::new(group.clone(), kind.clone(), name.clone()).matches(&group, &kind, &name));
    }

    #[test]
    fn exact_allowlist_fields_reject_other_values(
        name in "[a-z]{1,8}",
        other in "[a-z]{1,8}",
    ) {
        prop_assume!(name != other);
        let entry = ClusterScopedObjectIdentifier::new("", "Node", name);
        prop_assert!(!entry.matches("", "Node", &other));
    }
}
