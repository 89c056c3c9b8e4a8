//! Event tables.
//!
//! An [`EventTable`] is the sparse, tagged result of scanning code streams:
//! one [`EventRecord`] per matched position. Its schema is a fixed set of
//! core columns followed by the codemap's tag columns (and any columns added
//! by joins).
//!
//! Every operation returns a new table; nothing mutates the receiver.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{DType, JoinKey, TagValue};

/// Columns every event table carries, in order, ahead of the tag columns.
pub const CORE_COLUMNS: [&str; 11] = [
    "dblock_path",
    "stream_index",
    "stream_position",
    "anchor_tick",
    "anchor_code",
    "match_code",
    "log_ccode",
    "log_flags",
    "pattern_id",
    "regexp",
    "is_anchor",
];

const CORE_DTYPES: [DType; 11] = [
    DType::Str,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Int,
    DType::Str,
    DType::Bool,
];

/// Named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
}

impl Column {
    pub fn new(name: &str, dtype: DType) -> Self {
        Self { name: name.to_string(), dtype }
    }
}

// ── Records ───────────────────────────────────────────────────────────────

/// One matched stream position.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Block whose code stream was scanned.
    pub dblock_path: String,
    /// Index into that block's code stream.
    pub stream_index: usize,
    /// Sample tick of this row's code.
    pub stream_position: i64,
    /// Sample tick of the match's anchor code.
    pub anchor_tick: i64,
    pub anchor_code: i64,
    /// Code at this row's position.
    pub match_code: i64,
    pub log_ccode: i64,
    pub log_flags: i64,
    pub pattern_id: usize,
    pub regexp: String,
    /// True only for the anchor token's own row.
    pub is_anchor: bool,
    /// Values aligned with the owning table's tag columns.
    pub tags: Vec<TagValue>,
}

impl EventRecord {
    fn core_value(&self, i: usize) -> TagValue {
        match i {
            0 => TagValue::Str(self.dblock_path.clone()),
            1 => TagValue::Int(self.stream_index as i64),
            2 => TagValue::Int(self.stream_position),
            3 => TagValue::Int(self.anchor_tick),
            4 => TagValue::Int(self.anchor_code),
            5 => TagValue::Int(self.match_code),
            6 => TagValue::Int(self.log_ccode),
            7 => TagValue::Int(self.log_flags),
            8 => TagValue::Int(self.pattern_id as i64),
            9 => TagValue::Str(self.regexp.clone()),
            _ => TagValue::Bool(self.is_anchor),
        }
    }
}

/// Position of a column in a table's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRef {
    Core(usize),
    Tag(usize),
}

/// A record viewed through its table's schema.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a EventTable,
    pub record: &'a EventRecord,
}

impl<'a> RowRef<'a> {
    /// Value of `column`, or `None` if the table has no such column.
    pub fn get(&self, column: &str) -> Option<Cow<'a, TagValue>> {
        self.table.resolve(column).map(|c| self.value(c))
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(|v| v.as_i64())
    }

    pub fn get_str(&self, column: &str) -> Option<String> {
        self.get(column).and_then(|v| v.as_str().map(str::to_string))
    }

    fn value(&self, c: ColumnRef) -> Cow<'a, TagValue> {
        match c {
            ColumnRef::Core(i) => Cow::Owned(self.record.core_value(i)),
            ColumnRef::Tag(j) => Cow::Borrowed(&self.record.tags[j]),
        }
    }

    /// All values in schema order.
    pub fn values(self) -> impl Iterator<Item = Cow<'a, TagValue>> + 'a {
        (0..CORE_COLUMNS.len())
            .map(ColumnRef::Core)
            .chain((0..self.table.tag_columns.len()).map(ColumnRef::Tag))
            .map(move |c| self.value(c))
    }
}

// ── Table ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventTable {
    tag_columns: Vec<Column>,
    records: Vec<EventRecord>,
    index: Option<String>,
}

impl EventTable {
    /// Build a table. Every record must carry one value per tag column.
    pub fn new(tag_columns: Vec<Column>, records: Vec<EventRecord>) -> Result<Self> {
        if let Some(r) = records.iter().find(|r| r.tags.len() != tag_columns.len()) {
            return Err(Error::schema(format!(
                "record at {}:{} has {} tag values, table has {} tag columns",
                r.dblock_path,
                r.stream_position,
                r.tags.len(),
                tag_columns.len()
            )));
        }
        Ok(Self { tag_columns, records, index: None })
    }

    /// Concatenate tables with identical tag columns, in order.
    pub fn concat(tables: Vec<EventTable>) -> Result<Self> {
        let mut iter = tables.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(Self::default());
        };
        out.index = None;
        for t in iter {
            if t.tag_columns != out.tag_columns {
                return Err(Error::schema("cannot concatenate event tables with different tag columns"));
            }
            out.records.extend(t.records);
        }
        Ok(out)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn tag_columns(&self) -> &[Column] {
        &self.tag_columns
    }

    /// Full schema: core columns, then tag columns.
    pub fn columns(&self) -> Vec<Column> {
        CORE_COLUMNS
            .iter()
            .zip(CORE_DTYPES)
            .map(|(name, dtype)| Column::new(name, dtype))
            .chain(self.tag_columns.iter().cloned())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Key column declared by [`EventTable::set_index`], if any.
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.records.iter().map(move |record| RowRef { table: self, record })
    }

    pub fn row(&self, i: usize) -> Option<RowRef<'_>> {
        self.records.get(i).map(|record| RowRef { table: self, record })
    }

    fn resolve(&self, name: &str) -> Option<ColumnRef> {
        CORE_COLUMNS
            .iter()
            .position(|c| *c == name)
            .map(ColumnRef::Core)
            .or_else(|| self.tag_columns.iter().position(|c| c.name == name).map(ColumnRef::Tag))
    }

    fn require(&self, name: &str) -> Result<ColumnRef> {
        self.resolve(name).ok_or_else(|| Error::key(name, "no such column"))
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<TagValue>> {
        self.require(name)?;
        Ok(self.rows().filter_map(|r| r.get(name).map(Cow::into_owned)).collect())
    }

    /// Rows for which `predicate` holds. The index declaration is kept.
    pub fn filter<F>(&self, predicate: F) -> EventTable
    where
        F: Fn(&RowRef<'_>) -> bool,
    {
        let records = self
            .rows()
            .filter(|r| predicate(r))
            .map(|r| r.record.clone())
            .collect();
        EventTable {
            tag_columns: self.tag_columns.clone(),
            records,
            index: self.index.clone(),
        }
    }

    /// Rows at `indices`, in the given order. Out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> EventTable {
        EventTable {
            tag_columns: self.tag_columns.clone(),
            records: indices.iter().filter_map(|&i| self.records.get(i).cloned()).collect(),
            index: self.index.clone(),
        }
    }

    /// Declare `column` as the join key.
    ///
    /// Fails with [`Error::Key`] if the column is missing or holds a
    /// repeated non-null value.
    pub fn set_index(&self, column: &str) -> Result<EventTable> {
        self.require(column)?;
        let mut seen: HashMap<JoinKey, usize> = HashMap::new();
        for (i, row) in self.rows().enumerate() {
            let Some(key) = row.get(column).and_then(|v| v.join_key()) else {
                continue;
            };
            if let Some(first) = seen.insert(key, i) {
                return Err(Error::key(
                    column,
                    format!(
                        "duplicate key {} in rows {first} and {i}",
                        row.get(column).map(|v| v.to_string()).unwrap_or_default()
                    ),
                ));
            }
        }
        Ok(EventTable {
            tag_columns: self.tag_columns.clone(),
            records: self.records.clone(),
            index: Some(column.to_string()),
        })
    }

    /// Stable sort on `column` (null < bool < number < string).
    pub fn sort_by(&self, column: &str) -> Result<EventTable> {
        let c = self.require(column)?;
        let mut keyed: Vec<(TagValue, &EventRecord)> = self
            .rows()
            .map(|r| (r.value(c).into_owned(), r.record))
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(EventTable {
            tag_columns: self.tag_columns.clone(),
            records: keyed.into_iter().map(|(_, r)| r.clone()).collect(),
            index: self.index.clone(),
        })
    }

    /// Add `columns` from `other`, matched on the `on` column.
    ///
    /// Every row of `self` appears exactly once in the result, in order.
    /// Rows with no match (or a null key) get nulls. A key repeated in
    /// `other` is a [`Error::Schema`]: the join aligns items one to one.
    /// A requested column that already exists in `self` is also a
    /// [`Error::Schema`].
    pub fn left_join(&self, other: &EventTable, columns: &[&str], on: &str) -> Result<EventTable> {
        self.require(on)?;
        other.require(on)?;
        let picked: Vec<ColumnRef> = columns
            .iter()
            .map(|name| other.require(name))
            .collect::<Result<_>>()?;
        for name in columns {
            if self.has_column(name) {
                return Err(Error::schema(format!(
                    "join column '{name}' already exists in the left table"
                )));
            }
        }

        let mut lookup: HashMap<JoinKey, usize> = HashMap::new();
        for (i, row) in other.rows().enumerate() {
            let Some(key) = row.get(on).and_then(|v| v.join_key()) else {
                continue;
            };
            if lookup.insert(key, i).is_some() {
                return Err(Error::schema(format!(
                    "left_join on '{on}': key {} occurs more than once in the right table",
                    row.get(on).map(|v| v.to_string()).unwrap_or_default()
                )));
            }
        }

        let new_columns: Vec<Column> = columns
            .iter()
            .zip(&picked)
            .map(|(name, c)| Column {
                name: name.to_string(),
                dtype: match c {
                    ColumnRef::Core(i) => CORE_DTYPES[*i],
                    ColumnRef::Tag(j) => other.tag_columns[*j].dtype,
                },
            })
            .collect();

        let records = self
            .rows()
            .map(|row| {
                let hit = row
                    .get(on)
                    .and_then(|v| v.join_key())
                    .and_then(|k| lookup.get(&k))
                    .and_then(|&i| other.row(i));
                let mut rec = row.record.clone();
                rec.tags.extend(picked.iter().map(|&c| match &hit {
                    Some(r) => r.value(c).into_owned(),
                    None => TagValue::Null,
                }));
                rec
            })
            .collect();

        let matched = self
            .rows()
            .filter(|r| r.get(on).and_then(|v| v.join_key()).is_some_and(|k| lookup.contains_key(&k)))
            .count();
        log::debug!("left_join on '{on}': {matched}/{} rows matched", self.len());

        Ok(EventTable {
            tag_columns: self.tag_columns.iter().cloned().chain(new_columns).collect(),
            records,
            index: self.index.clone(),
        })
    }

    // ── JSON ──────────────────────────────────────────────────────────────

    /// Column-oriented JSON document: `{"columns": [...], "rows": [[...]]}`.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<Vec<TagValue>> = self
            .rows()
            .map(|r| r.values().map(Cow::into_owned).collect())
            .collect();
        serde_json::json!({
            "columns": self.columns(),
            "index": self.index,
            "rows": rows,
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.to_json())?;
        std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }
}
