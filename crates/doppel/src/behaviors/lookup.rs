//! Lookup behavior: keyed join against an external CSV source.
//!
//! The key is extracted from the request the same way copy sources are, the
//! CSV row whose key column equals it supplies the replacements, and every
//! `${token}["column"]` occurrence in the response is filled in.

use super::copy::replace_token;
use super::extraction::apply_selector;
use crate::imposter::types::LookupBehavior;
use crate::model::{Request, Response};
use crate::predicate::value_to_string;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::warn;

/// Apply a lookup behavior. Missing keys, unreadable files and absent rows
/// make the behavior a no-op.
pub fn apply_lookup(request: &Request, response: &mut Response, lookup: &LookupBehavior) {
    let request_value = request.to_value();
    let Some(raw_key) = dotted_lookup(&request_value, &lookup.key.from) else {
        return;
    };
    let key = match &lookup.key.using {
        Some(selector) => match apply_selector(&raw_key, selector) {
            Some(extracted) => extracted,
            None => return,
        },
        None => value_to_string(&raw_key),
    };

    let csv = &lookup.from_data_source.csv;
    let row = match read_row(&csv.path, csv.delimiter, &csv.key_column, &key) {
        Ok(Some(row)) => row,
        Ok(None) => return,
        Err(e) => {
            warn!("lookup data source {} unreadable: {e}", csv.path);
            return;
        }
    };

    for (column, value) in row {
        let double = format!("{}[\"{}\"]", lookup.into, column);
        let single = format!("{}['{}']", lookup.into, column);
        replace_token(response, &double, &value);
        replace_token(response, &single, &value);
    }
}

fn dotted_lookup(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map
                    .get(part)
                    .cloned()
                    .or_else(|| {
                        map.iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(part))
                            .map(|(_, v)| v.clone())
                    })?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Scan the CSV for the first row whose key column equals the key. Returns
/// (column, value) pairs on a hit.
fn read_row(
    path: &str,
    delimiter: char,
    key_column: &str,
    key: &str,
) -> std::io::Result<Option<Vec<(String, String)>>> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let header_line = match lines.next() {
        Some(line) => line?,
        None => return Ok(None),
    };
    let headers: Vec<String> = header_line
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .collect();
    let key_index = match headers.iter().position(|h| h == key_column) {
        Some(i) => i,
        None => {
            warn!("lookup key column {key_column} not present in {path}");
            return Ok(None);
        }
    };

    for line in lines {
        let line = line?;
        let values: Vec<String> = line.split(delimiter).map(|s| s.trim().to_string()).collect();
        if values.get(key_index).map(String::as_str) == Some(key) {
            return Ok(Some(
                headers.iter().cloned().zip(values.into_iter()).collect(),
            ));
        }
    }
    Ok(None)
}
