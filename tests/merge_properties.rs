#[path = "../src/merge.rs"]
#[allow(dead_code)]
mod merge;

use merge::{merge, merge_identity};
use serde_json::{json, Value};

fn ids(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("id").and_then(|v| v.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn trees() -> Vec<(Value, Value)> {
    vec![
        (
            json!({"Grade 11": {"STEM": {"A": [{"id": "s1", "name": "ONE"}]}}}),
            json!({"Grade 11": {"STEM": {"A": [{"id": "s2", "name": "TWO"}]}}}),
        ),
        (
            json!({"Grade 11": {"ABM": {"B": [{"id": "s1"}, {"id": "s3"}]}}}),
            json!({"Grade 12": {"ABM": {"B": [{"id": "s3", "irregular": true}]}}}),
        ),
        (
            json!({"records": [{"id": "r1", "info": {"lname": "A"}}, {"id": "r2"}]}),
            json!({"records": [{"id": "r2", "info": {"lname": "B"}}, {"id": "r9"}]}),
        ),
        (json!({"settings": {"x": 1, "y": [1, 2]}}), json!({"settings": {"y": []}})),
        (
            json!({"Grade 11": {"STEM": {"A": [{"id": "s1"}, {"id": "s2"}]}}}),
            json!({"Grade 11": {"STEM": {"A": []}}}),
        ),
        (
            json!({"records": [{"id": "r1"}, {"note": "x"}, {"id": "r1", "dup": true}]}),
            json!({"records": [{"id": "r2"}, "loose", {"note": "x"}, {"id": "r1", "v": 2}]}),
        ),
    ]
}

#[test]
fn merging_never_drops_base_entities() {
    for (base, incoming) in trees() {
        let out = merge(&base, &incoming);
        for path in [
            "/Grade 11/STEM/A",
            "/Grade 11/ABM/B",
            "/records",
        ] {
            let before = ids(base.pointer(path).unwrap_or(&Value::Null));
            let after = ids(out.pointer(path).unwrap_or(&Value::Null));
            for id in &before {
                let want = before.iter().filter(|b| *b == id).count();
                let got = after.iter().filter(|a| *a == id).count();
                assert!(got >= want, "{id} lost at {path}: {out}");
            }
            let len = |v: &Value, p: &str| v.pointer(p).and_then(Value::as_array).map_or(0, Vec::len);
            assert!(len(&out, path) >= len(&base, path), "items dropped at {path}: {out}");
        }
    }
}

#[test]
fn merge_is_idempotent_for_repeated_incoming() {
    for (base, incoming) in trees() {
        let once = merge(&base, &incoming);
        let twice = merge(&once, &incoming);
        assert_eq!(once, twice);
        assert_eq!(merge(&incoming, &incoming), incoming);
    }
}

#[test]
fn empty_or_mixed_incoming_sections_keep_every_base_item() {
    let base = json!({"Grade 11": {"STEM": {"A": [{"id": "s1"}, {"id": "s2"}]}}});
    assert_eq!(merge(&base, &json!({"Grade 11": {"STEM": {"A": []}}})), base);

    let base = json!({"records": [{"id": "r1"}, {"note": "x"}]});
    let incoming = json!({"records": [{"id": "r2"}, "loose", {"note": "x"}]});
    assert_eq!(
        merge(&base, &incoming),
        json!({"records": [{"id": "r1"}, {"note": "x"}, {"id": "r2"}, "loose"]})
    );
}

#[test]
fn incoming_entity_replaces_base_entity_in_place() {
    let base = json!({"records": [{"id": "r1", "v": 1}, {"id": "r2", "v": 1, "extra": true}]});
    let incoming = json!({"records": [{"id": "r2", "v": 2}]});
    let out = merge(&base, &incoming);
    assert_eq!(
        out,
        json!({"records": [{"id": "r1", "v": 1}, {"id": "r2", "v": 2}]})
    );
}

#[test]
fn plain_arrays_and_scalars_are_leaves() {
    let out = merge(&json!({"a": [1, 2, 3], "b": "x"}), &json!({"a": [4], "b": null}));
    assert_eq!(out, json!({"a": [4], "b": null}));
    assert_eq!(merge(&json!({"a": 1}), &json!(7)), json!(7));
}

#[test]
fn inputs_are_left_untouched() {
    let base = json!({"Grade 11": {"STEM": {"A": [{"id": "s1"}]}}});
    let incoming = json!({"Grade 11": {"STEM": {"A": [{"id": "s2"}]}}});
    let (b, i) = (base.clone(), incoming.clone());
    let _ = merge(&base, &incoming);
    assert_eq!(base, b);
    assert_eq!(incoming, i);
}

#[test]
fn identity_merge_only_touches_info_and_eligibility() {
    let existing = json!({
        "id": "r1",
        "info": {"lname": "DELA CRUZ", "lrn": "1"},
        "eligibility": {"hsCompleter": false},
        "semester1": {"subjects": [{"subject": "Math", "final": "90"}]}
    });
    let imported = json!({
        "id": "other",
        "info": {"lname": "DELA CRUZ-SANTOS"},
        "eligibility": {"hsCompleter": true},
        "semester1": {"subjects": [{"subject": "Math", "final": ""}]}
    });
    let out = merge_identity(&existing, &imported);
    assert_eq!(out["id"], "r1");
    assert_eq!(out["info"], json!({"lname": "DELA CRUZ-SANTOS", "lrn": "1"}));
    assert_eq!(out["eligibility"]["hsCompleter"], true);
    assert_eq!(out["semester1"], existing["semester1"]);
}
