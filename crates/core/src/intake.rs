//! Lockfile intake.
//!
//! Turns an npm `package-lock.json` into a request whose packages are ready
//! for the license worker.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::status::{
    CreateRequest, PackageSpec, PackageStatus, PackageStore, PackageUpdate, RequestRecord,
    StoreError,
};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Lockfile is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Lockfile has no dependencies")]
    Empty,

    #[error("Unsupported lockfile: {0}")]
    Unsupported(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of parsing a lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLockfile {
    pub packages: Vec<PackageSpec>,
    /// Entries that could not be used, with the reason.
    pub skipped: Vec<String>,
}

/// License field as found in package metadata. Older packages use an object
/// (`{"type": "MIT"}`) or a list of such objects.
fn license_of(entry: &Value) -> Option<String> {
    fn one(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(map) => map.get("type").and_then(one),
            _ => None,
        }
    }

    if let Some(license) = entry.get("license").and_then(one) {
        return Some(license);
    }
    match entry.get("licenses") {
        Some(Value::Array(items)) => {
            let ids: Vec<String> = items.iter().filter_map(one).collect();
            match ids.len() {
                0 => None,
                1 => ids.into_iter().next(),
                _ => Some(format!("({})", ids.join(" OR "))),
            }
        }
        Some(other) => one(other),
        None => None,
    }
}

/// Package name from a `packages` key such as `node_modules/a/node_modules/@s/b`.
fn name_from_path(path: &str) -> Option<&str> {
    let idx = path.rfind("node_modules/")?;
    let name = &path[idx + "node_modules/".len()..];
    (!name.is_empty()).then_some(name)
}

/// Parse an npm lockfile (v1, v2 or v3).
///
/// The root project, linked workspace packages and duplicate `name@version`
/// pairs are left out. Entries without a version are skipped and reported.
pub fn parse_lockfile(content: &str) -> Result<ParsedLockfile, IntakeError> {
    let doc: Value = serde_json::from_str(content)?;
    let mut parsed = ParsedLockfile::default();
    let mut seen = HashSet::new();

    let mut push = |parsed: &mut ParsedLockfile, name: &str, entry: &Value| {
        if entry.get("link").and_then(Value::as_bool) == Some(true) {
            return;
        }
        let Some(version) = entry.get("version").and_then(Value::as_str) else {
            warn!("Skipping lockfile entry {} without a version", name);
            parsed.skipped.push(format!("{}: missing version", name));
            return;
        };
        if seen.insert((name.to_string(), version.to_string())) {
            let mut spec = PackageSpec::new(name, version);
            spec.license_expression = license_of(entry);
            parsed.packages.push(spec);
        }
    };

    if let Some(packages) = doc.get("packages").and_then(Value::as_object) {
        for (path, entry) in packages {
            if path.is_empty() {
                continue;
            }
            match entry.get("name").and_then(Value::as_str).or_else(|| name_from_path(path)) {
                Some(name) => push(&mut parsed, name, entry),
                None => parsed.skipped.push(format!("{}: no package name", path)),
            }
        }
    } else if let Some(deps) = doc.get("dependencies").and_then(Value::as_object) {
        // v1: nested dependency tree.
        let mut stack: Vec<(&String, &Value)> = deps.iter().collect();
        while let Some((name, entry)) = stack.pop() {
            push(&mut parsed, name, entry);
            if let Some(nested) = entry.get("dependencies").and_then(Value::as_object) {
                stack.extend(nested.iter());
            }
        }
    } else if doc.get("lockfileVersion").is_none() {
        return Err(IntakeError::Unsupported(
            "no lockfileVersion, packages or dependencies".to_string(),
        ));
    }

    if parsed.packages.is_empty() {
        return Err(IntakeError::Empty);
    }

    parsed
        .packages
        .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    Ok(parsed)
}

/// Create a request from a lockfile and move its packages to `Parsed`.
pub fn submit_lockfile(
    store: &dyn PackageStore,
    requested_by: &str,
    source: &str,
    content: &str,
) -> Result<(RequestRecord, ParsedLockfile), IntakeError> {
    let parsed = parse_lockfile(content)?;

    let mut request = CreateRequest::new(requested_by).with_source(source);
    request.packages = parsed.packages.clone();
    let record = store.create_request(request)?;

    for package in store.request_packages(&record.id)? {
        store.transition(
            &package.id,
            PackageStatus::Submitted,
            PackageStatus::Parsed,
            None,
            &PackageUpdate::default(),
        )?;
    }

    info!(
        request = %record.id,
        requested_by,
        packages = parsed.packages.len(),
        skipped = parsed.skipped.len(),
        "Lockfile submitted"
    );
    Ok((record, parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{PackageFilter, SqlitePackageStore};
    use crate::testing::fixtures;

    #[test]
    fn test_parse_v3_lockfile() {
        let content = r#"{
            "name": "app",
            "lockfileVersion": 3,
            "packages": {
                "": {"name": "app", "version": "1.0.0"},
                "node_modules/left-pad": {"version": "1.3.0", "license": "WTFPL"},
                "node_modules/@babel/core": {"version": "7.24.0", "license": "MIT"},
                "node_modules/a/node_modules/left-pad": {"version": "1.3.0", "license": "WTFPL"},
                "node_modules/b/node_modules/left-pad": {"version": "1.1.0"},
                "node_modules/local": {"resolved": "packages/local", "link": true}
            }
        }"#;

        let parsed = parse_lockfile(content).unwrap();
        let names: Vec<(&str, &str)> = parsed
            .packages
            .iter()
            .map(|p| (p.name.as_str(), p.version.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("@babel/core", "7.24.0"),
                ("left-pad", "1.1.0"),
                ("left-pad", "1.3.0"),
            ]
        );
        assert_eq!(parsed.packages[0].license_expression.as_deref(), Some("MIT"));
        assert_eq!(parsed.packages[1].license_expression, None);
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn test_parse_v1_lockfile() {
        let content = r#"{
            "name": "app",
            "lockfileVersion": 1,
            "dependencies": {
                "express": {
                    "version": "4.18.2",
                    "dependencies": {
                        "debug": {"version": "2.6.9"}
                    }
                },
                "broken": {}
            }
        }"#;

        let parsed = parse_lockfile(content).unwrap();
        assert_eq!(parsed.packages.len(), 2);
        assert_eq!(parsed.packages[0].name, "debug");
        assert_eq!(parsed.skipped, vec!["broken: missing version".to_string()]);
    }

    #[test]
    fn test_legacy_license_objects() {
        let entry: Value = serde_json::json!({"license": {"type": "MIT"}});
        assert_eq!(license_of(&entry).as_deref(), Some("MIT"));

        let entry: Value = serde_json::json!({"licenses": [{"type": "MIT"}, {"type": "Apache-2.0"}]});
        assert_eq!(license_of(&entry).as_deref(), Some("(MIT OR Apache-2.0)"));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            parse_lockfile("not json"),
            Err(IntakeError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_lockfile(r#"{"lockfileVersion": 3, "packages": {"": {}}}"#),
            Err(IntakeError::Empty)
        ));
        assert!(matches!(
            parse_lockfile(r#"{"hello": "world"}"#),
            Err(IntakeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_submit_lockfile_parses_rows() {
        let store = SqlitePackageStore::in_memory().unwrap();
        let content = fixtures::lockfile(&[("a", "1.0.0", "MIT"), ("b", "2.0.0", "ISC")]);

        let (record, parsed) =
            submit_lockfile(&store, "alice", "package-lock.json", &content).unwrap();
        assert_eq!(parsed.packages.len(), 2);
        assert_eq!(record.requested_by, "alice");
        assert_eq!(
            store
                .count(&PackageFilter::new().with_status(PackageStatus::Parsed))
                .unwrap(),
            2
        );
    }
}
