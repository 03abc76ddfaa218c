//! Property tests for the sanitizer.

use bastion_core::security::{PatternDetector, Sanitizer, ThreatCategory};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Fragments that tend to interact with the removal and escaping steps.
fn hostile_text() -> impl Strategy<Value = String> {
    let fragment = prop_oneof![
        Just("<script>".to_string()),
        Just("</script>".to_string()),
        Just("<scr".to_string()),
        Just("ipt>".to_string()),
        Just("javascript:".to_string()),
        Just("onerror=".to_string()),
        Just("onload = \"x\"".to_string()),
        Just("&amp;".to_string()),
        Just("&".to_string()),
        Just("<".to_string()),
        Just(">".to_string()),
        Just("\"".to_string()),
        Just("'".to_string()),
        Just("/".to_string()),
        Just("  ".to_string()),
        Just("\n\t".to_string()),
        Just("\u{0}".to_string()),
        "[a-zA-Z0-9 ]{0,8}",
    ];
    prop::collection::vec(fragment, 0..12).prop_map(|parts| parts.concat())
}

/// Split-and-nested active content, deep enough to need many removal passes.
fn deeply_nested() -> impl Strategy<Value = String> {
    let split = prop_oneof![
        Just(("java", "script:")),
        Just(("vb", "script :")),
        Just(("<scr", "ipt>")),
        Just(("<SCR", "IPT x>")),
    ];
    (split, 20usize..80, "[a-z()0-9]{0,6}")
        .prop_map(|((head, tail), depth, rest)| format!("{}{}{}", head.repeat(depth), tail.repeat(depth), rest))
}

proptest! {
    #[test]
    fn filter_is_idempotent(input in any::<String>()) {
        let sanitizer = Sanitizer::new();
        let once = sanitizer.filter(&input);
        prop_assert_eq!(sanitizer.filter(&once), once);
    }

    #[test]
    fn filter_is_idempotent_on_hostile_text(input in hostile_text()) {
        let sanitizer = Sanitizer::new();
        let once = sanitizer.filter(&input);
        prop_assert_eq!(sanitizer.filter(&once), once);
    }

    #[test]
    fn filtered_text_never_retriggers_xss(input in hostile_text()) {
        let sanitizer = Sanitizer::new();
        let detector = PatternDetector::with_categories([ThreatCategory::Xss]);
        let filtered = sanitizer.filter(&input);
        prop_assert!(
            !detector.is_threat(&filtered),
            "{:?} filtered to {:?}",
            input,
            filtered
        );
    }

    #[test]
    fn json_sanitisation_is_idempotent(key in hostile_text(), value in hostile_text()) {
        let sanitizer = Sanitizer::new();
        let mut map = Map::new();
        map.insert(key, json!([value, 1, null]));
        let once = sanitizer.sanitize_json(Value::Object(map));
        prop_assert_eq!(sanitizer.sanitize_json(once.clone()), once);
    }

    #[test]
    fn deep_nesting_is_fully_removed(input in deeply_nested()) {
        let sanitizer = Sanitizer::new();
        let detector = PatternDetector::with_categories([ThreatCategory::Xss]);
        let once = sanitizer.filter(&input);
        prop_assert_eq!(sanitizer.filter(&once), once.clone());
        prop_assert!(!detector.is_threat(&once), "{:?} filtered to {:?}", input, once);

        let mut map = Map::new();
        map.insert("href".to_string(), Value::String(input));
        let cleaned = sanitizer.sanitize_json(Value::Object(map));
        prop_assert_eq!(&cleaned["href"], &Value::String(once));
    }
}
