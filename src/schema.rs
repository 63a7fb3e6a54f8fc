//! Staging-table schema: text type ladder, per-column overrides, and DDL rendering.
//!
//! Every CSV column is loaded as text. A column starts at [`TextType::VarChar100`]
//! and is widened one step at a time (`VARCHAR(100)` → `TEXT` → `MEDIUMTEXT`)
//! when the database rejects a value as too long. The widened types for a file
//! live in a [`ColumnTypeMap`], which only ever grows while that file loads.
//!
//! [`build_schema`] turns a header row plus the current overrides into a
//! [`TableSchema`], and [`TableSchema::ddl`] renders the `DROP TABLE IF EXISTS` /
//! `CREATE TABLE` pair for a [`Dialect`].

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    str::FromStr,
};

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use encoding_rs::{BIG5, EUC_KR, Encoding, GB18030, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

const STAGING_SUFFIX: &str = "_temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TextType {
    #[serde(rename = "VARCHAR(100)")]
    VarChar100,
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "MEDIUMTEXT")]
    MediumText,
}

/// Capacity of a text type as enforced by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthLimit {
    Chars(usize),
    Bytes(usize),
}

impl TextType {
    pub const DEFAULT: TextType = TextType::VarChar100;

    /// The next larger type, or `None` once the ladder is exhausted.
    pub fn widen(self) -> Option<TextType> {
        match self {
            TextType::VarChar100 => Some(TextType::Text),
            TextType::Text => Some(TextType::MediumText),
            TextType::MediumText => None,
        }
    }

    pub fn limit(self) -> WidthLimit {
        match self {
            TextType::VarChar100 => WidthLimit::Chars(100),
            TextType::Text => WidthLimit::Bytes(65_535),
            TextType::MediumText => WidthLimit::Bytes(16_777_215),
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            TextType::VarChar100 => "VARCHAR(100)",
            TextType::Text => "TEXT",
            TextType::MediumText => "MEDIUMTEXT",
        }
    }
}

impl fmt::Display for TextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for TextType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "VARCHAR(100)" | "VARCHAR" => Ok(TextType::VarChar100),
            "TEXT" => Ok(TextType::Text),
            "MEDIUMTEXT" => Ok(TextType::MediumText),
            _ => Err(anyhow!(
                "Unsupported column type '{value}' (expected VARCHAR(100), TEXT, or MEDIUMTEXT)"
            )),
        }
    }
}

/// Per-file record of columns whose type has been widened past the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnTypeMap {
    types: BTreeMap<String, TextType>,
}

impl ColumnTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<TextType> {
        self.types.get(column).copied()
    }

    /// Effective type for `column`, falling back to [`TextType::DEFAULT`].
    pub fn type_for(&self, column: &str) -> TextType {
        self.get(column).unwrap_or(TextType::DEFAULT)
    }

    pub fn set(&mut self, column: impl Into<String>, ty: TextType) {
        self.types.insert(column.into(), ty);
    }

    /// Moves `column` one step up the ladder and returns its new type.
    ///
    /// Returns `None` and leaves the map untouched when the column is already at
    /// the widest type.
    pub fn widen(&mut self, column: &str) -> Option<TextType> {
        let next = self.type_for(column).widen()?;
        self.types.insert(column.to_string(), next);
        Some(next)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<(String, TextType)> for ColumnTypeMap {
    fn from_iter<I: IntoIterator<Item = (String, TextType)>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ColumnTypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.types.is_empty() {
            return f.write_str("{}");
        }
        let entries = self
            .types
            .iter()
            .map(|(name, ty)| format!("{name}: {ty}"))
            .join(", ");
        write!(f, "{{{entries}}}")
    }
}

/// Table character set matching the encoding the source file was decoded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charset(String);

impl Charset {
    pub fn for_encoding(encoding: &'static Encoding) -> Self {
        let name = if encoding == UTF_8 {
            "utf8mb4".to_string()
        } else if encoding == GBK {
            "gbk".to_string()
        } else if encoding == GB18030 {
            "gb18030".to_string()
        } else if encoding == BIG5 {
            "big5".to_string()
        } else if encoding == SHIFT_JIS {
            "sjis".to_string()
        } else if encoding == EUC_KR {
            "euckr".to_string()
        } else if encoding == WINDOWS_1252 {
            "latin1".to_string()
        } else {
            encoding
                .name()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        };
        Charset(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[value(rename_all = "kebab-case")]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[value(name = "mysql")]
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: TextType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub charset: Charset,
}

/// The statements that (re)create a table from nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ddl {
    pub drop: String,
    pub create: String,
}

impl Ddl {
    pub fn statements(&self) -> [&str; 2] {
        [self.drop.as_str(), self.create.as_str()]
    }
}

impl fmt::Display for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{};", self.drop)?;
        write!(f, "{};", self.create)
    }
}

pub fn build_schema(
    table_name: &str,
    column_names: &[String],
    charset: &Charset,
    type_overrides: &ColumnTypeMap,
) -> TableSchema {
    TableSchema {
        name: table_name.to_string(),
        columns: column_names
            .iter()
            .map(|name| ColumnDef {
                name: name.clone(),
                ty: type_overrides.type_for(name),
            })
            .collect(),
        charset: charset.clone(),
    }
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn ddl(&self, dialect: Dialect) -> Ddl {
        let table = dialect.quote_identifier(&self.name);
        let create = match dialect {
            Dialect::MySql => {
                let columns = self
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", dialect.quote_identifier(&c.name), c.ty))
                    .join(", ");
                format!(
                    "CREATE TABLE {table} ({columns}) CHARACTER SET {}",
                    self.charset
                )
            }
            Dialect::Sqlite => {
                let columns = self
                    .columns
                    .iter()
                    .map(|c| format!("{} TEXT", dialect.quote_identifier(&c.name)));
                // One named constraint per column; the name is the column, so a
                // violation identifies the overflowing column.
                let checks = self.columns.iter().map(|c| {
                    let quoted = dialect.quote_identifier(&c.name);
                    let measured = match c.ty.limit() {
                        WidthLimit::Chars(max) => format!("length({quoted}) <= {max}"),
                        WidthLimit::Bytes(max) => {
                            format!("length(CAST({quoted} AS BLOB)) <= {max}")
                        }
                    };
                    format!("CONSTRAINT {quoted} CHECK ({measured})")
                });
                format!("CREATE TABLE {table} ({})", columns.chain(checks).join(", "))
            }
        };
        Ddl {
            drop: format!("DROP TABLE IF EXISTS {table}"),
            create,
        }
    }
}

/// Final table name for a CSV file: its file stem.
pub fn table_name_for(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot derive a table name from {path:?}"))
}

pub fn staging_table_name(table_name: &str) -> String {
    format!("{table_name}{STAGING_SUFFIX}")
}

/// Parses `column=TYPE` override directives.
pub fn parse_overrides(directives: &[String]) -> Result<ColumnTypeMap> {
    directives
        .iter()
        .map(|raw| {
            let (column, ty) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("Override '{raw}' must look like column=TYPE"))?;
            let column = column.trim();
            if column.is_empty() {
                return Err(anyhow!("Override '{raw}' is missing a column name"));
            }
            Ok((column.to_string(), ty.parse::<TextType>()?))
        })
        .collect()
}
