// Small string table with stable row labels, used for schedule and provider reports
use crate::soap::ApiError;
use crate::xmlmanip::{Record, XmlValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    // Row label; survives filtering and sorting until `reset_index`.
    pub index: usize,
    pub values: BTreeMap<String, String>,
}

impl Row {
    // Missing cells read as empty strings.
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Left,
    Inner,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
    // label for the next appended row
    next_index: usize,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            next_index: 0,
        }
    }

    // One row per record; columns in order of first appearance. Nested values are
    // reduced to their text, or to JSON when they have none.
    pub fn from_records(records: &[Record]) -> Self {
        let mut table = Table::default();
        for record in records {
            table.push_values(record_values(record));
        }
        table
    }

    pub fn from_rows(rows: Vec<BTreeMap<String, String>>, columns: Vec<String>) -> Self {
        let mut table = Table::new(columns);
        for values in rows {
            table.push_map(values);
        }
        table
    }

    // Append a row from ordered pairs, registering unseen columns in that order.
    pub fn push_values(&mut self, values: Vec<(String, String)>) {
        let mut map = BTreeMap::new();
        for (key, value) in values {
            if !self.columns.contains(&key) {
                self.columns.push(key.clone());
            }
            map.insert(key, value);
        }
        let index = self.take_index();
        self.rows.push(Row { index, values: map });
    }

    fn push_map(&mut self, values: BTreeMap<String, String>) {
        for key in values.keys() {
            if !self.columns.contains(key) {
                self.columns.push(key.clone());
            }
        }
        let index = self.take_index();
        self.rows.push(Row { index, values });
    }

    fn take_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    // Row by label.
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.iter().find(|r| r.index == index)
    }

    pub fn filter<F: Fn(&Row) -> bool>(&self, predicate: F) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
            next_index: self.next_index,
        }
    }

    // Stable sort on the given columns, compared as strings.
    pub fn sort_by_columns(&mut self, columns: &[&str]) {
        self.rows.sort_by(|a, b| {
            columns
                .iter()
                .map(|c| a.get(c).cmp(b.get(c)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn reset_index(&mut self) {
        for (position, row) in self.rows.iter_mut().enumerate() {
            row.index = position;
        }
        self.next_index = self.rows.len();
    }

    pub fn drop_indices(&self, indices: &HashSet<usize>) -> Table {
        self.filter(|row| !indices.contains(&row.index))
    }

    // Drop columns; names not in the table are ignored.
    pub fn drop_columns(&mut self, columns: &[&str]) {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in &mut self.rows {
            for column in columns {
                row.values.remove(*column);
            }
        }
    }

    pub fn rename_columns(&mut self, renames: &[(&str, &str)]) {
        for (from, to) in renames {
            for column in self.columns.iter_mut() {
                if column == from {
                    *column = to.to_string();
                }
            }
            for row in &mut self.rows {
                if let Some(value) = row.values.remove(*from) {
                    row.values.insert(to.to_string(), value);
                }
            }
        }
    }

    pub fn add_column(&mut self, column: &str, default: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
        for row in &mut self.rows {
            row.set(column, default);
        }
    }

    // Put `first` at the front, keeping the remaining columns in their current order.
    pub fn reorder_columns(&mut self, first: &[String]) {
        let mut ordered: Vec<String> = first
            .iter()
            .filter(|c| self.columns.contains(c))
            .cloned()
            .collect();
        ordered.extend(self.columns.iter().filter(|c| !first.contains(c)).cloned());
        self.columns = ordered;
    }

    // Distinct values of a column in order of first appearance.
    pub fn unique(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|r| r.get(column))
            .filter(|v| seen.insert(v.to_string()))
            .map(str::to_string)
            .collect()
    }

    // Join on `left_on[i] == right_on[i]` for every key pair. Right-hand columns that
    // clash with a left-hand column (other than a shared key) get `_x`/`_y` suffixes.
    // Unmatched cells of a left join are empty. The result is re-indexed from zero.
    pub fn merge(&self, right: &Table, left_on: &[&str], right_on: &[&str], how: Join) -> Table {
        let shared_keys: Vec<&str> = left_on
            .iter()
            .zip(right_on)
            .filter(|(l, r)| l == r)
            .map(|(l, _)| *l)
            .collect();
        let clashes: HashSet<&str> = right
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| self.has_column(c) && !shared_keys.contains(c))
            .collect();

        let left_name = |c: &str| {
            if clashes.contains(c) {
                format!("{}_x", c)
            } else {
                c.to_string()
            }
        };
        let right_name = |c: &str| {
            if clashes.contains(c) {
                format!("{}_y", c)
            } else {
                c.to_string()
            }
        };

        let mut columns: Vec<String> = self.columns.iter().map(|c| left_name(c)).collect();
        for column in &right.columns {
            if shared_keys.contains(&column.as_str()) {
                continue;
            }
            columns.push(right_name(column));
        }

        let mut by_key: HashMap<Vec<&str>, Vec<&Row>> = HashMap::new();
        for row in &right.rows {
            let key = right_on.iter().map(|c| row.get(c)).collect();
            by_key.entry(key).or_default().push(row);
        }

        let mut merged = Table::new(columns.clone());
        for left_row in &self.rows {
            let key: Vec<&str> = left_on.iter().map(|c| left_row.get(c)).collect();
            let matches = by_key.get(&key).map(Vec::as_slice).unwrap_or_default();

            if matches.is_empty() && how == Join::Left {
                let mut values = BTreeMap::new();
                for column in &self.columns {
                    values.insert(left_name(column), left_row.get(column).to_string());
                }
                merged.push_map(values);
                continue;
            }
            for right_row in matches.iter().copied() {
                let mut values = BTreeMap::new();
                for column in &self.columns {
                    values.insert(left_name(column), left_row.get(column).to_string());
                }
                for column in &right.columns {
                    if shared_keys.contains(&column.as_str()) {
                        continue;
                    }
                    values.insert(right_name(column), right_row.get(column).to_string());
                }
                merged.push_map(values);
            }
        }
        merged.columns = columns;
        merged
    }

    // Fill every missing cell with an empty string.
    pub fn fill_missing(&mut self) {
        for row in &mut self.rows {
            for column in &self.columns {
                row.values.entry(column.clone()).or_default();
            }
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Table, ApiError> {
        let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut table = Table::new(headers.clone());
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let values = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            table.push_map(values);
        }
        Ok(table)
    }

    pub fn to_csv_path(&self, path: &Path) -> Result<(), ApiError> {
        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        writer.write_record(&self.columns).map_err(csv_error)?;
        for row in &self.rows {
            writer
                .write_record(self.columns.iter().map(|c| row.get(c)))
                .map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }

    // Rows as JSON objects, with the row label under `index`.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let mut object = Map::new();
                    object.insert("index".to_string(), Value::from(row.index));
                    for column in &self.columns {
                        object.insert(column.clone(), Value::from(row.get(column)));
                    }
                    Value::Object(object)
                })
                .collect(),
        )
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), ApiError> {
        serde_json::to_writer_pretty(writer, &self.to_json())
            .map_err(|e| ApiError::Io(e.to_string()))
    }
}

// Record entries as ordered text pairs.
pub fn record_values(record: &Record) -> Vec<(String, String)> {
    record
        .iter()
        .map(|(key, value)| (key.to_string(), flatten_value(value)))
        .collect()
}

fn flatten_value(value: &XmlValue) -> String {
    match value {
        XmlValue::Text(text) => text.clone(),
        other => match other.as_text() {
            Some(text) => text.to_string(),
            None => serde_json::to_string(other).unwrap_or_default(),
        },
    }
}

fn csv_error(err: csv::Error) -> ApiError {
    ApiError::Io(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[(&str, &str)]]) -> Table {
        let mut table = Table::default();
        for row in rows {
            table.push_values(
                row.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        table
    }

    #[test]
    fn test_columns_in_first_appearance_order() {
        let t = table(&[&[("b", "1"), ("a", "2")], &[("c", "3")]]);
        assert_eq!(t.columns(), &["b", "a", "c"]);
        assert_eq!(t.rows()[1].get("a"), "");
    }

    #[test]
    fn test_filter_keeps_labels_and_reset_renumbers() {
        let t = table(&[&[("x", "1")], &[("x", "2")], &[("x", "1")]]);
        let mut ones = t.filter(|r| r.get("x") == "1");
        assert_eq!(ones.indices(), vec![0, 2]);
        ones.reset_index();
        assert_eq!(ones.indices(), vec![0, 1]);
    }

    #[test]
    fn test_push_after_filter_gets_fresh_label() {
        let t = table(&[&[("x", "1")], &[("x", "2")], &[("x", "3")]]);
        let mut kept = t.filter(|r| r.get("x") != "3");
        kept.push_values(vec![("x".to_string(), "4".to_string())]);
        assert_eq!(kept.indices(), vec![0, 1, 3]);

        kept.reset_index();
        kept.push_values(vec![("x".to_string(), "5".to_string())]);
        assert_eq!(kept.indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sort_is_stable_over_columns() {
        let mut t = table(&[
            &[("s", "2017-05-02"), ("e", "b")],
            &[("s", "2017-05-01"), ("e", "z")],
            &[("s", "2017-05-01"), ("e", "a")],
        ]);
        t.sort_by_columns(&["s", "e"]);
        assert_eq!(t.indices(), vec![2, 1, 0]);
    }

    #[test]
    fn test_left_merge_fills_unmatched() {
        let schedule = table(&[&[("siteid", "1"), ("who", "a")], &[("siteid", "9"), ("who", "b")]]);
        let sites = table(&[&[("site_id", "1"), ("site_name", "North")]]);
        let merged = schedule.merge(&sites, &["siteid"], &["site_id"], Join::Left);
        assert_eq!(merged.columns(), &["siteid", "who", "site_id", "site_name"]);
        assert_eq!(merged.rows()[0].get("site_name"), "North");
        assert_eq!(merged.rows()[1].get("site_name"), "");
    }

    #[test]
    fn test_inner_merge_on_shared_keys_with_clash() {
        let left = table(&[
            &[("k", "1"), ("e", "10"), ("name", "L1")],
            &[("k", "2"), ("e", "20"), ("name", "L2")],
        ]);
        let right = table(&[&[("k", "2"), ("e", "20"), ("name", "R2")]]);
        let merged = left.merge(&right, &["k", "e"], &["k", "e"], Join::Inner);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.columns(), &["k", "e", "name_x", "name_y"]);
        assert_eq!(merged.rows()[0].get("name_y"), "R2");
    }

    #[test]
    fn test_merge_large_tables() {
        let mut shifts = Table::default();
        for i in 0..5_000 {
            shifts.push_values(vec![
                ("siteid".to_string(), (i % 1_200).to_string()),
                ("shift".to_string(), i.to_string()),
            ]);
        }
        let mut sites = Table::default();
        for i in 0..1_000 {
            sites.push_values(vec![
                ("site_id".to_string(), i.to_string()),
                ("site_name".to_string(), format!("Site {}", i)),
            ]);
        }

        let left = shifts.merge(&sites, &["siteid"], &["site_id"], Join::Left);
        assert_eq!(left.len(), 5_000);
        assert_eq!(left.indices(), (0..5_000).collect::<Vec<_>>());
        assert_eq!(left.rows()[1_201].get("site_name"), "Site 1");
        assert_eq!(left.rows()[1_100].get("site_name"), "");

        let inner = shifts.merge(&sites, &["siteid"], &["site_id"], Join::Inner);
        let expected = (0..5_000).filter(|i| i % 1_200 < 1_000).count();
        assert_eq!(inner.len(), expected);
        assert!(inner
            .rows()
            .iter()
            .all(|r| r.get("site_name") == format!("Site {}", r.get("siteid"))));
    }

    #[test]
    fn test_drop_rename_reorder() {
        let mut t = table(&[&[("a", "1"), ("b", "2"), ("c", "3")]]);
        t.drop_columns(&["b", "missing"]);
        t.rename_columns(&[("a", "alpha")]);
        t.reorder_columns(&["c".to_string()]);
        assert_eq!(t.columns(), &["c", "alpha"]);
        assert_eq!(t.rows()[0].get("alpha"), "1");
    }

    #[test]
    fn test_unique_preserves_order() {
        let t = table(&[&[("p", "b")], &[("p", "a")], &[("p", "b")]]);
        assert_eq!(t.unique("p"), vec!["b", "a"]);
    }

    #[test]
    fn test_csv_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let t = table(&[&[("provider_id", "1234"), ("name", "Smith, J")]]);
        t.to_csv_path(&path).unwrap();
        let read = Table::from_csv_path(&path).unwrap();
        assert_eq!(read.columns(), t.columns());
        assert_eq!(read.rows()[0].get("name"), "Smith, J");
    }

    #[test]
    fn test_json_rows_carry_index() {
        let t = table(&[&[("a", "1")]]);
        assert_eq!(t.to_json()[0]["index"], 0);
        assert_eq!(t.to_json()[0]["a"], "1");
    }
}
