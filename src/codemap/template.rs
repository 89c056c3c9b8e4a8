//! Item-templated codemaps.
//!
//! Experiments with one stimulus code per item repeat the same handful of
//! response patterns for every item. A [`CodeMapTemplate`] holds those
//! patterns once, with a named placeholder token standing for the item code,
//! and expands them against an [`ItemTable`]. Substitution happens on tokens,
//! so the expanded patterns never pass back through the text parser.
//!
//! ```text
//! template entry:  (#[1]) 8 (ITEM_ID) 1040   → 2100 animate like
//! item row:        item_id=101 condition_id=1 …
//! expanded:        (#1) 8 (101) 1040          → 2100 animate like 101 1 …
//! ```

use crate::codemap::pattern::{self, CodeClass, Token};
use crate::codemap::CodeMap;
use crate::error::{Error, Result};
use crate::table::Column;
use crate::value::{DType, TagValue};

/// Typed table of item information (one row per stimulus item).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<TagValue>>,
}

impl ItemTable {
    /// Parse whitespace-delimited text with a header row. Column types are
    /// inferred per column.
    pub fn parse_whitespace(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let names: Vec<String> = lines
            .next()
            .ok_or_else(|| Error::schema("item table has no header row"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let raw: Vec<Vec<&str>> = lines.map(|l| l.split_whitespace().collect()).collect();
        if let Some((i, r)) = raw.iter().enumerate().find(|(_, r)| r.len() != names.len()) {
            return Err(Error::schema(format!(
                "item table row {}: {} fields, header has {}",
                i + 1,
                r.len(),
                names.len()
            )));
        }

        let columns: Vec<Column> = names
            .into_iter()
            .enumerate()
            .map(|(j, name)| Column { name, dtype: DType::infer(raw.iter().map(|r| r[j])) })
            .collect();
        let rows = raw
            .iter()
            .map(|r| {
                r.iter()
                    .zip(&columns)
                    .map(|(cell, col)| TagValue::parse_as(cell, col.dtype).unwrap_or(TagValue::Null))
                    .collect()
            })
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Rows whose `column` equals `value`.
    pub fn filter_eq(&self, column: &str, value: &TagValue) -> Result<ItemTable> {
        let j = self
            .column_index(column)
            .ok_or_else(|| Error::key(column, "no such item column"))?;
        Ok(ItemTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| &r[j] == value).cloned().collect(),
        })
    }
}

/// One templated pattern and its tag values.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEntry {
    pub tokens: Vec<Token>,
    pub tags: Vec<TagValue>,
}

impl TemplateEntry {
    pub fn parse(pattern: &str, tags: Vec<TagValue>) -> Result<Self> {
        let tokens = pattern::tokenize(pattern)
            .map_err(|bad| Error::schema(format!("template '{pattern}': malformed token '{bad}'")))?;
        Ok(Self { tokens, tags })
    }

    fn anchor_class(&self) -> Option<&CodeClass> {
        self.tokens.iter().find_map(|t| match t {
            Token::Match { class, anchor: true, .. } => Some(class),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeMapTemplate {
    /// Codemap tag columns before the item columns, bin id first.
    pub tag_columns: Vec<Column>,
    /// Placeholder token name, e.g. `ITEM_ID`.
    pub placeholder: String,
    /// Item column whose value replaces the placeholder.
    pub item_column: String,
    /// When set, an entry is expanded for an item only if the entry's anchor
    /// accepts the item's value in this column.
    pub condition_column: Option<String>,
    /// Fixed rows emitted ahead of the expansion. Tag values cover the tag
    /// columns followed by the item columns.
    pub header_rows: Vec<TemplateEntry>,
    pub entries: Vec<TemplateEntry>,
}

impl CodeMapTemplate {
    pub fn new(tag_columns: Vec<Column>, placeholder: &str, item_column: &str) -> Self {
        Self {
            tag_columns,
            placeholder: placeholder.to_string(),
            item_column: item_column.to_string(),
            condition_column: None,
            header_rows: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_condition(mut self, column: &str) -> Self {
        self.condition_column = Some(column.to_string());
        self
    }

    pub fn header(mut self, pattern: &str, tags: Vec<TagValue>) -> Result<Self> {
        self.header_rows.push(TemplateEntry::parse(pattern, tags)?);
        Ok(self)
    }

    pub fn entry(mut self, pattern: &str, tags: Vec<TagValue>) -> Result<Self> {
        self.entries.push(TemplateEntry::parse(pattern, tags)?);
        Ok(self)
    }

    /// Expand every entry for every item, items outermost, then compile.
    pub fn expand(&self, items: &ItemTable) -> Result<CodeMap> {
        let item_j = items
            .column_index(&self.item_column)
            .ok_or_else(|| Error::key(&self.item_column, "no such item column"))?;
        if items.columns[item_j].dtype != DType::Int {
            return Err(Error::schema(format!(
                "item column '{}' must be integer to stand in for a code",
                self.item_column
            )));
        }
        let cond_j = match &self.condition_column {
            Some(c) => Some(items.column_index(c).ok_or_else(|| Error::key(c, "no such item column"))?),
            None => None,
        };

        let columns: Vec<Column> = self.tag_columns.iter().chain(&items.columns).cloned().collect();
        let mut rows: Vec<(Vec<Token>, Vec<TagValue>)> = self
            .header_rows
            .iter()
            .map(|h| (h.tokens.clone(), h.tags.clone()))
            .collect();

        for item in &items.rows {
            let Some(code) = item[item_j].as_i64() else {
                continue;
            };
            let condition = cond_j.and_then(|j| item[j].as_i64());
            for entry in &self.entries {
                if cond_j.is_some() {
                    let accepts = match (entry.anchor_class(), condition) {
                        (Some(class), Some(c)) => class.contains(c),
                        _ => false,
                    };
                    if !accepts {
                        continue;
                    }
                }
                let tokens = entry
                    .tokens
                    .iter()
                    .map(|t| self.substitute(t, code))
                    .collect();
                let tags = entry.tags.iter().chain(item.iter()).cloned().collect();
                rows.push((tokens, tags));
            }
        }

        log::debug!(
            "expanded codemap template: {} items x {} entries -> {} patterns",
            items.rows.len(),
            self.entries.len(),
            rows.len()
        );
        CodeMap::from_patterns(columns, rows)
    }

    fn substitute(&self, tok: &Token, code: i64) -> Token {
        match tok {
            Token::Match { class: CodeClass::Placeholder(name), anchor, captured }
                if *name == self.placeholder =>
            {
                Token::Match { class: CodeClass::Codes(vec![code]), anchor: *anchor, captured: *captured }
            }
            other => other.clone(),
        }
    }
}
