//! Matching caller attributes against required security attributes
//!
//! A requirement map is satisfied when, for every key it names, the subject
//! holds all of the required values. An empty requirement admits anyone. A
//! non-empty requirement never admits a request without a subject.

use catalog_core::{SecurityAttributes, Subject};

/// Why a subject was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NoSubject,
    MissingValues { key: String, missing: Vec<String> },
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::NoSubject => f.write_str("no subject on a secured request"),
            Denial::MissingValues { key, missing } => {
                write!(f, "subject lacks {}={}", key, missing.join(","))
            }
        }
    }
}

pub fn check(subject: Option<&Subject>, required: &SecurityAttributes) -> Result<(), Denial> {
    if required.values().all(|values| values.is_empty()) {
        return Ok(());
    }
    let subject = subject.ok_or(Denial::NoSubject)?;

    let mut keys: Vec<&String> = required.keys().collect();
    keys.sort();
    for key in keys {
        let wanted = &required[key];
        let held = subject.values(key);
        let missing: Vec<String> = wanted
            .iter()
            .filter(|value| !held.is_some_and(|held| held.contains(*value)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Denial::MissingValues {
                key: key.clone(),
                missing,
            });
        }
    }
    Ok(())
}

pub fn permits(subject: Option<&Subject>, required: &SecurityAttributes) -> bool {
    check(subject, required).is_ok()
}

/// Merge `extra` into `into`, unioning value sets per key
pub fn merge(into: &mut SecurityAttributes, extra: &SecurityAttributes) {
    for (key, values) in extra {
        into.entry(key.clone()).or_default().extend(values.iter().cloned());
    }
}
