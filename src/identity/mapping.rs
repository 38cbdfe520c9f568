//! Channel mapping entries and the two dataset formats they are published in.
//!
//! CSV (current):
//!
//! ```text
//! standard_name,raw_names,logo_url,group_name,tvg_id,tvg_chno,tvg_shift,catchup,catchup_days,catchup_source
//! ##########News##########,,,,,,,,,
//! CCTV-1,"CCTV1,CCTV-1 HD",https://logo/cctv1.png,News,cctv1,1,,,,
//! ```
//!
//! Legacy line format:
//!
//! ```text
//! CCTV-1 = "CCTV1" "CCTV-1 HD" = https://logo/cctv1.png = News
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use streamsweep_common::{ExtendedAttrs, ResolvedIdentity};

/// Mappings keyed by standard name.
pub type MappingTable = BTreeMap<String, MappingEntry>;

/// Aliases and presentation attributes for one standard name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    #[serde(default)]
    pub raw_names: Vec<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default, flatten)]
    pub extended: ExtendedAttrs,
}

impl MappingEntry {
    pub fn identity(&self, standard_name: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            standard_name: standard_name.to_string(),
            group: self.group.clone(),
            logo: self.logo.clone(),
            extended: self.extended.clone(),
        }
    }
}

/// Trim, collapse inner whitespace, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lookup index over a combined mapping table.
#[derive(Debug, Default, Clone)]
pub struct ReverseIndex {
    by_raw: HashMap<String, String>,
    by_standard: HashMap<String, String>,
}

impl ReverseIndex {
    /// Build from remote and user tables; user entries win on conflict.
    pub fn build(remote: &MappingTable, user: &MappingTable) -> Self {
        let mut index = Self::default();
        for table in [remote, user] {
            for (standard, entry) in table {
                index
                    .by_standard
                    .insert(normalize_name(standard), standard.clone());
                for raw in &entry.raw_names {
                    let key = normalize_name(raw);
                    if !key.is_empty() {
                        index.by_raw.insert(key, standard.clone());
                    }
                }
            }
        }
        index
    }

    /// Standard name for a raw name: alias match first, then standard-name match.
    pub fn standard_for(&self, raw_name: &str) -> Option<&str> {
        let key = normalize_name(raw_name);
        if key.is_empty() {
            return None;
        }
        self.by_raw
            .get(&key)
            .or_else(|| self.by_standard.get(&key))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_raw.is_empty() && self.by_standard.is_empty()
    }
}

/// Parse a dataset, picking the format from its first meaningful line.
pub fn parse_dataset(text: &str) -> MappingTable {
    let text = text.trim_start_matches('\u{feff}');
    let first = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first.to_lowercase().starts_with("standard_name") {
        parse_csv(text)
    } else {
        parse_legacy(text)
    }
}

/// Parse the CSV format. Rows without a standard name and group header rows are skipped.
pub fn parse_csv(text: &str) -> MappingTable {
    let text = text.trim_start_matches('\u{feff}');
    let mut rows = csv_records(text).into_iter();
    let Some(header) = rows.next() else {
        return MappingTable::new();
    };
    let columns: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect();

    let field = |row: &[String], name: &str| -> Option<String> {
        columns
            .get(name)
            .and_then(|&i| row.get(i))
            .and_then(|v| present(v))
    };

    let mut table = MappingTable::new();
    for row in rows {
        let Some(standard) = field(&row, "standard_name") else {
            continue;
        };
        if is_group_header(&standard) {
            continue;
        }

        let raw_names = columns
            .get("raw_names")
            .and_then(|&i| row.get(i))
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        table.insert(
            standard,
            MappingEntry {
                raw_names,
                logo: field(&row, "logo_url"),
                group: field(&row, "group_name"),
                extended: ExtendedAttrs {
                    tvg_id: field(&row, "tvg_id"),
                    tvg_chno: field(&row, "tvg_chno"),
                    tvg_shift: field(&row, "tvg_shift"),
                    catchup: field(&row, "catchup"),
                    catchup_days: field(&row, "catchup_days"),
                    catchup_source: field(&row, "catchup_source"),
                },
            },
        );
    }
    table
}

/// Parse the legacy `Standard = "raw 1" "raw 2" = logo = group` format.
pub fn parse_legacy(text: &str) -> MappingTable {
    let mut table = MappingTable::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((standard, entry)) = parse_legacy_line(line) {
            table.insert(standard, entry);
        }
    }
    table
}

fn parse_legacy_line(line: &str) -> Option<(String, MappingEntry)> {
    let mut parts = line.splitn(4, '=').map(str::trim);
    let standard = parts.next().filter(|s| !s.is_empty())?.to_string();
    let raw_names = split_quoted(parts.next()?);
    let strip = |s: &str| present(s.trim_matches(|c| c == '"' || c == '\'' || c == ' '));
    let logo = parts.next().and_then(strip);
    let group = parts.next().and_then(strip);

    Some((
        standard,
        MappingEntry {
            raw_names,
            logo,
            group,
            extended: ExtendedAttrs::default(),
        },
    ))
}

/// Split on whitespace, keeping quoted runs together.
fn split_quoted(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in s.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    out.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        out.push(current);
    }
    out.retain(|s| !s.is_empty());
    out
}

/// RFC 4180-style records: quoted fields may hold commas, newlines, and `""`.
fn csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.trim().is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if record.iter().any(|f| !f.trim().is_empty()) {
            records.push(record);
        }
    }
    records
}

fn present(value: &str) -> Option<String> {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "" | "none" | "null" => None,
        _ => Some(value.to_string()),
    }
}

fn is_group_header(name: &str) -> bool {
    name.starts_with("##########") && name.ends_with("##########")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\u{feff}standard_name,raw_names,logo_url,group_name,tvg_id,tvg_chno,tvg_shift,catchup,catchup_days,catchup_source\n\
##########央视频道##########,,,,,,,,,\n\
CCTV-1,\"CCTV1,CCTV-1 HD, cctv 1 综合\",https://logo/cctv1.png,央视频道,cctv1,1,,append,7,\"?playseek=${(b)yyyyMMddHHmmss}\"\n\
Local,,none,NULL,,,,,,\n";

    #[test]
    fn test_parse_csv() {
        let table = parse_csv(CSV);
        assert_eq!(table.len(), 2);

        let cctv = &table["CCTV-1"];
        assert_eq!(cctv.raw_names, vec!["CCTV1", "CCTV-1 HD", "cctv 1 综合"]);
        assert_eq!(cctv.logo.as_deref(), Some("https://logo/cctv1.png"));
        assert_eq!(cctv.group.as_deref(), Some("央视频道"));
        assert_eq!(cctv.extended.tvg_id.as_deref(), Some("cctv1"));
        assert_eq!(cctv.extended.catchup_days.as_deref(), Some("7"));
        assert_eq!(
            cctv.extended.catchup_source.as_deref(),
            Some("?playseek=${(b)yyyyMMddHHmmss}")
        );

        let local = &table["Local"];
        assert!(local.raw_names.is_empty());
        assert_eq!(local.logo, None);
        assert_eq!(local.group, None);
    }

    #[test]
    fn test_bare_hash_row_is_a_group_header() {
        let csv = "standard_name,raw_names\n####################,\n##########,x\nReal,r\n";
        let table = parse_csv(csv);
        assert_eq!(table.keys().map(String::as_str).collect::<Vec<_>>(), vec!["Real"]);
    }

    #[test]
    fn test_parse_legacy() {
        let text = "# comment\nCCTV-1 = \"CCTV1\" \"CCTV 1 HD\" = https://logo/1.png = News\nPlain = a b\n\nbroken line\n";
        let table = parse_legacy(text);
        assert_eq!(table.len(), 2);
        assert_eq!(table["CCTV-1"].raw_names, vec!["CCTV1", "CCTV 1 HD"]);
        assert_eq!(table["CCTV-1"].logo.as_deref(), Some("https://logo/1.png"));
        assert_eq!(table["CCTV-1"].group.as_deref(), Some("News"));
        assert_eq!(table["Plain"].raw_names, vec!["a", "b"]);
        assert_eq!(table["Plain"].logo, None);
    }

    #[test]
    fn test_parse_dataset_detects_format() {
        assert!(parse_dataset(CSV).contains_key("CCTV-1"));
        assert!(parse_dataset("X = \"x1\"").contains_key("X"));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  CCTV   1\tHD "), "cctv 1 hd");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_reverse_index_user_wins() {
        let mut remote = MappingTable::new();
        remote.insert(
            "CCTV-1".into(),
            MappingEntry {
                raw_names: vec!["CCTV1".into()],
                ..Default::default()
            },
        );
        let mut user = MappingTable::new();
        user.insert(
            "CCTV-1 综合".into(),
            MappingEntry {
                raw_names: vec!["cctv1".into()],
                ..Default::default()
            },
        );

        let index = ReverseIndex::build(&remote, &user);
        assert_eq!(index.standard_for("CCTV1"), Some("CCTV-1 综合"));
        assert_eq!(index.standard_for(" cctv-1 "), Some("CCTV-1"));
        assert_eq!(index.standard_for("unknown"), None);
        assert_eq!(index.standard_for(""), None);
    }

    #[test]
    fn test_entry_round_trips_through_json() {
        let entry = MappingEntry {
            raw_names: vec!["a".into()],
            logo: Some("l".into()),
            group: None,
            extended: ExtendedAttrs {
                tvg_chno: Some("5".into()),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"tvg_chno\":\"5\""));
        let back: MappingEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
