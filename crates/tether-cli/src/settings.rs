//! Patching the instrument's hierarchical settings tree from flat
//! `KEY=VALUE` pairs, and flattening the tree back for display.

use anyhow::{anyhow, bail};
use serde_json::{Map, Value};

/// Split `KEY=VALUE` command line arguments into pairs.
pub fn parse_pairs(args: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| anyhow!("'{arg}' is not a KEY=VALUE pair"))
        })
        .collect()
}

/// Flatten a settings tree into sorted `dotted.key` / value pairs.
pub fn flatten(tree: &Map<String, Value>) -> Vec<(String, Value)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    walk(&format!("{prefix}.{key}"), child, out);
                }
            }
            other => out.push((prefix.to_string(), other.clone())),
        }
    }
    let mut out = Vec::new();
    for (key, value) in tree {
        walk(key, value, &mut out);
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Render a leaf value the way an operator typed it in.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Apply flat `KEY=VALUE` pairs to a fetched settings tree.
///
/// A dotted key `section.key` writes `tree[section][key]`, creating the
/// section object when missing. An undotted key is a shorthand: it is
/// searched in every top-level section; zero matches writes the key at the
/// top level, exactly one match writes into that section, several matches
/// are ambiguous and rejected with the qualified alternatives.
pub fn apply_patch(tree: &mut Map<String, Value>, pairs: &[(String, String)]) -> anyhow::Result<()> {
    for (key, raw) in pairs {
        let value = coerce(raw);
        match key.split_once('.') {
            Some((section, leaf)) => {
                let parent = tree
                    .entry(section.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                let Value::Object(parent) = parent else {
                    bail!("'{section}' is not a settings section, cannot set '{key}'");
                };
                parent.insert(leaf.to_string(), value);
            }
            None => {
                let candidates: Vec<String> = tree
                    .iter()
                    .filter(|(_, child)| {
                        child
                            .as_object()
                            .is_some_and(|section| section.contains_key(key.as_str()))
                    })
                    .map(|(section, _)| section.clone())
                    .collect();
                match candidates.as_slice() {
                    [] => {
                        tree.insert(key.clone(), value);
                    }
                    [section] => {
                        if let Some(Value::Object(section)) = tree.get_mut(section) {
                            section.insert(key.clone(), value);
                        }
                    }
                    several => bail!(
                        "key '{key}' is ambiguous; qualify it as one of: {}",
                        several
                            .iter()
                            .map(|section| format!("{section}.{key}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                }
            }
        }
    }
    Ok(())
}

/// `true`/`false` (any case) become booleans, everything else stays text.
fn coerce(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Map<String, Value> {
        json!({
            "ethernet": { "dhcp": true, "hostname": "rack" },
            "wifi": { "ssid": "lab", "hostname": "rack-wifi" },
            "label": "bench 3"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn flatten_emits_sorted_dotted_keys() {
        let flat = flatten(&tree());
        let keys: Vec<&str> = flat.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "ethernet.dhcp",
                "ethernet.hostname",
                "label",
                "wifi.hostname",
                "wifi.ssid"
            ]
        );
        assert_eq!(flat[0].1, json!(true));
    }

    #[test]
    fn dotted_key_writes_into_section() {
        let mut tree = tree();
        apply_patch(
            &mut tree,
            &[("ethernet.dhcp".to_string(), "false".to_string())],
        )
        .unwrap();
        assert_eq!(tree["ethernet"]["dhcp"], json!(false));
    }

    #[test]
    fn dotted_key_creates_missing_section() {
        let mut tree = tree();
        apply_patch(&mut tree, &[("ntp.server".to_string(), "pool".to_string())]).unwrap();
        assert_eq!(tree["ntp"]["server"], json!("pool"));
    }

    #[test]
    fn undotted_key_finds_its_unique_section() {
        let mut tree = tree();
        apply_patch(&mut tree, &[("ssid".to_string(), "workshop".to_string())]).unwrap();
        assert_eq!(tree["wifi"]["ssid"], json!("workshop"));
    }

    #[test]
    fn undotted_key_without_candidate_goes_topmost() {
        let mut tree = tree();
        apply_patch(&mut tree, &[("brightness".to_string(), "70".to_string())]).unwrap();
        assert_eq!(tree["brightness"], json!("70"));
    }

    #[test]
    fn ambiguous_undotted_key_is_rejected() {
        let mut tree = tree();
        let err = apply_patch(&mut tree, &[("hostname".to_string(), "x".to_string())])
            .unwrap_err();
        assert!(err.to_string().contains("ethernet.hostname"));
        assert!(err.to_string().contains("wifi.hostname"));
    }

    #[test]
    fn scalar_section_is_rejected() {
        let mut tree = tree();
        let err =
            apply_patch(&mut tree, &[("label.color".to_string(), "red".to_string())]).unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn booleans_are_coerced() {
        assert_eq!(coerce("TRUE"), json!(true));
        assert_eq!(coerce("false"), json!(false));
        assert_eq!(coerce("maybe"), json!("maybe"));
    }

    #[test]
    fn pairs_require_an_equals_sign() {
        assert!(parse_pairs(&["dhcp".to_string()]).is_err());
        let pairs = parse_pairs(&["dhcp=true".to_string()]).unwrap();
        assert_eq!(pairs, [("dhcp".to_string(), "true".to_string())]);
    }
}
