use indexeddb_store::{Evaluation, Key, KeyPath};
use serde_json::json;

#[test]
fn single_segment_resolves_a_nested_property() {
    let path = KeyPath::String("id".into());
    let value = json!({"id": 7, "name": "a"});
    match path.evaluate(&value) {
        Evaluation::Resolved(Key::Number(n)) => assert_eq!(n, 7.0),
        other => panic!("expected Resolved(Number(7.0)), got {other:?}"),
    }
}

#[test]
fn dotted_segment_walks_nested_objects() {
    let path = KeyPath::String("a.b.c".into());
    let value = json!({"a": {"b": {"c": "deep"}}});
    match path.evaluate(&value) {
        Evaluation::Resolved(Key::String(s)) => assert_eq!(s, "deep"),
        other => panic!("expected Resolved(String), got {other:?}"),
    }
}

#[test]
fn missing_intermediate_is_unresolved() {
    let path = KeyPath::String("a.b".into());
    let value = json!({"a": "not an object"});
    assert!(matches!(path.evaluate(&value), Evaluation::Unresolved));
}

#[test]
fn non_key_terminal_is_invalid() {
    let path = KeyPath::String("flag".into());
    let value = json!({"flag": true});
    assert!(matches!(path.evaluate(&value), Evaluation::Invalid));
}

#[test]
fn length_segment_special_cases_strings_and_arrays() {
    let string_path = KeyPath::String("s.length".into());
    let string_value = json!({"s": "hello"});
    match string_path.evaluate(&string_value) {
        Evaluation::Resolved(Key::Number(n)) => assert_eq!(n, 5.0),
        other => panic!("unexpected {other:?}"),
    }

    let array_path = KeyPath::String("items.length".into());
    let array_value = json!({"items": [1, 2, 3]});
    match array_path.evaluate(&array_value) {
        Evaluation::Resolved(Key::Number(n)) => assert_eq!(n, 3.0),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn sequence_path_resolves_to_an_array_key() {
    let path = KeyPath::Sequence(vec!["a".into(), "b".into()]);
    let value = json!({"a": 1, "b": "x"});
    match path.evaluate(&value) {
        Evaluation::Resolved(Key::Array(items)) => {
            assert_eq!(items, vec![Key::Number(1.0), Key::String("x".into())]);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn sequence_path_is_unresolved_if_any_member_is() {
    let path = KeyPath::Sequence(vec!["a".into(), "missing".into()]);
    let value = json!({"a": 1});
    assert!(matches!(path.evaluate(&value), Evaluation::Unresolved));
}

#[test]
fn inject_creates_intermediate_objects() {
    let path = KeyPath::String("a.b".into());
    let mut value = json!({});
    path.inject(&mut value, &Key::Number(9.0)).unwrap();
    assert_eq!(value, json!({"a": {"b": 9.0}}));
}

#[test]
fn validate_rejects_empty_sequence_and_bad_identifiers() {
    assert!(KeyPath::Sequence(vec![]).validate().is_err());
    assert!(KeyPath::String("1bad".into()).validate().is_err());
    assert!(KeyPath::String("good_name$".into()).validate().is_ok());
    assert!(KeyPath::String("".into()).validate().is_ok());
}

#[test]
fn auto_increment_and_multi_entry_eligibility() {
    assert!(KeyPath::String("id".into()).allows_auto_increment());
    assert!(!KeyPath::String("".into()).allows_auto_increment());
    assert!(!KeyPath::Sequence(vec!["a".into()]).allows_auto_increment());

    assert!(KeyPath::String("tags".into()).allows_multi_entry());
    assert!(!KeyPath::Sequence(vec!["a".into()]).allows_multi_entry());
}

#[test]
fn evaluate_raw_skips_key_validity_check_for_multi_entry_extraction() {
    let path = KeyPath::String("tags".into());
    let value = json!({"tags": [true, "x", 1]});
    let raw = path.evaluate_raw(&value).unwrap();
    assert_eq!(raw, json!([true, "x", 1]));
}
