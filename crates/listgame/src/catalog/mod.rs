//! Schema Catalog: field metadata for the game and milestone event tables.
//!
//! The catalog is loaded once per process (from a JSON document or the
//! builtin definition) and is read-only afterwards. Per-request context is
//! carried by [`QueryScope`], never by globals.

mod builtin;
mod scope;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub use scope::{FieldOwner, QueryScope};

/// Column shared by both tables, used to join milestones to their game.
pub const JOIN_KEY_FIELD: &str = "game_key";
/// Row identity column, appended to every row ordering as a tie-break.
pub const ID_FIELD: &str = "id";
pub const ACTOR_FIELD: &str = "name";
pub const NOUN_FIELD: &str = "noun";
pub const VERB_FIELD: &str = "verb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Integer,
    Date,
    Text,
    Boolean,
}

impl ScalarKind {
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Date | Self::Text => "TEXT",
        }
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Date => "date",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" | "i" => Some(Self::Integer),
            "date" | "d" => Some(Self::Date),
            "text" | "s" => Some(Self::Text),
            "boolean" | "b" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Field kinds an aggregate function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Any,
    Only(ScalarKind),
}

impl AggregateKind {
    #[must_use]
    pub fn accepts(self, kind: Option<ScalarKind>) -> bool {
        match self {
            Self::Any => true,
            Self::Only(required) => kind == Some(required),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        if value.trim() == "*" {
            Some(Self::Any)
        } else {
            ScalarKind::parse(value).map(Self::Only)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ScalarKind,
    pub summarisable: bool,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKind {
    /// Primary context: one row per finished game.
    Game,
    /// Secondary context: in-game events, joinable to their game.
    Milestone,
}

impl ContextKind {
    /// Context consulted when a field is not found locally.
    #[must_use]
    pub const fn fallback(self) -> Option<Self> {
        match self {
            Self::Game => None,
            Self::Milestone => Some(Self::Game),
        }
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Milestone => "milestone",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaContext {
    kind: ContextKind,
    base_table: String,
    alias: String,
    entity_name: String,
    default_sort: String,
    fields: Vec<FieldSpec>,
    by_name: BTreeMap<String, usize>,
    pivot_values: BTreeSet<String>,
}

impl SchemaContext {
    fn new(
        kind: ContextKind,
        base_table: &str,
        alias: &str,
        entity_name: &str,
        default_sort: &str,
        fields: Vec<FieldSpec>,
        pivot_values: BTreeSet<String>,
    ) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name.clone(), index))
            .collect();
        Self {
            kind,
            base_table: base_table.to_string(),
            alias: alias.to_string(),
            entity_name: entity_name.to_string(),
            default_sort: default_sort.to_string(),
            fields,
            by_name,
            pivot_values,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    #[must_use]
    pub fn default_sort(&self) -> &str {
        &self.default_sort
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|index| &self.fields[*index])
    }

    /// Synthetic group-by keys that pivot onto the noun/verb columns.
    #[must_use]
    pub fn is_pivot(&self, name: &str) -> bool {
        self.pivot_values.contains(name)
    }

    #[must_use]
    pub fn pivot_values(&self) -> &BTreeSet<String> {
        &self.pivot_values
    }
}

/// On-disk catalog document. Field metadata is plain records, parsed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CatalogFile {
    pub default_game_type: String,
    pub game_type_prefixes: BTreeMap<String, String>,
    pub aggregate_function_types: BTreeMap<String, String>,

    #[serde(default)]
    pub column_aliases: BTreeMap<String, String>,

    pub game_fields: Vec<FieldEntry>,
    pub milestone_fields: Vec<FieldEntry>,

    #[serde(default)]
    pub milestone_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldEntry {
    pub name: String,
    pub kind: ScalarKind,

    #[serde(default = "default_summarisable")]
    pub summarisable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

fn default_summarisable() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct Catalog {
    default_game_type: String,
    game_type_prefixes: BTreeMap<String, String>,
    aggregate_functions: BTreeMap<String, AggregateKind>,
    column_aliases: BTreeMap<String, String>,
    game: SchemaContext,
    milestone: SchemaContext,
}

impl Catalog {
    #[must_use]
    pub fn builtin() -> Self {
        let file = builtin::catalog_file();
        let aggregate_functions = file
            .aggregate_function_types
            .iter()
            .filter_map(|(name, kind)| AggregateKind::parse(kind).map(|kind| (name.clone(), kind)))
            .collect();
        Self::assemble(file, aggregate_functions)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog: {}", path.display()))?;
        let catalog = Self::from_json_str(&raw)
            .with_context(|| format!("invalid catalog: {}", path.display()))?;
        info!(
            path = %path.display(),
            game_fields = catalog.game.fields.len(),
            milestone_fields = catalog.milestone.fields.len(),
            "loaded schema catalog"
        );
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(raw).context("failed to parse catalog json")?;
        Self::from_file(file)
    }

    pub fn from_file(file: CatalogFile) -> Result<Self> {
        if !file.game_type_prefixes.contains_key(&file.default_game_type) {
            bail!(
                "default game type `{}` has no table prefix",
                file.default_game_type
            );
        }

        let mut aggregate_functions = BTreeMap::new();
        for (name, kind) in &file.aggregate_function_types {
            let Some(parsed) = AggregateKind::parse(kind) else {
                bail!("aggregate function `{name}` has unknown field kind `{kind}`");
            };
            aggregate_functions.insert(name.to_ascii_lowercase(), parsed);
        }

        for (label, fields) in [
            ("game_fields", &file.game_fields),
            ("milestone_fields", &file.milestone_fields),
        ] {
            let mut seen = BTreeSet::new();
            for field in fields {
                if !seen.insert(field.name.to_ascii_lowercase()) {
                    bail!("{label} repeats field `{}`", field.name);
                }
            }
            if !seen.contains(ID_FIELD) || !seen.contains(JOIN_KEY_FIELD) {
                bail!("{label} must declare `{ID_FIELD}` and `{JOIN_KEY_FIELD}`");
            }
        }

        Ok(Self::assemble(file, aggregate_functions))
    }

    fn assemble(file: CatalogFile, aggregate_functions: BTreeMap<String, AggregateKind>) -> Self {
        let game = SchemaContext::new(
            ContextKind::Game,
            "logrecord",
            "lg",
            "game",
            "end",
            field_specs(&file.game_fields),
            BTreeSet::new(),
        );
        let milestone = SchemaContext::new(
            ContextKind::Milestone,
            "milestone",
            "mst",
            "milestone",
            "time",
            field_specs(&file.milestone_fields),
            file.milestone_types
                .iter()
                .map(|value| value.to_ascii_lowercase())
                .collect(),
        );
        let column_aliases = file
            .column_aliases
            .into_iter()
            .map(|(alias, target)| (alias.to_ascii_lowercase(), target.to_ascii_lowercase()))
            .collect();

        Self {
            default_game_type: file.default_game_type,
            game_type_prefixes: file.game_type_prefixes,
            aggregate_functions,
            column_aliases,
            game,
            milestone,
        }
    }

    #[must_use]
    pub fn context(&self, kind: ContextKind) -> &SchemaContext {
        match kind {
            ContextKind::Game => &self.game,
            ContextKind::Milestone => &self.milestone,
        }
    }

    /// Looks a field up by name in the game context, then the milestone one.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        let name = self.canonical_name(name);
        self.game
            .field(&name)
            .or_else(|| self.milestone.field(&name))
    }

    #[must_use]
    pub fn summarisable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|field| field.summarisable)
            || self.milestone.is_pivot(&self.canonical_name(name))
    }

    #[must_use]
    pub fn aggregate_functions(&self) -> &BTreeMap<String, AggregateKind> {
        &self.aggregate_functions
    }

    #[must_use]
    pub fn game_types(&self) -> &BTreeMap<String, String> {
        &self.game_type_prefixes
    }

    #[must_use]
    pub fn default_game_type(&self) -> &str {
        &self.default_game_type
    }

    /// Canonical game type for a user token, if it names one.
    #[must_use]
    pub fn game_type(&self, token: &str) -> Option<&str> {
        self.game_type_prefixes
            .keys()
            .find(|game| game.eq_ignore_ascii_case(token))
            .map(String::as_str)
    }

    /// Lower-cased, alias-resolved field name. Existence is not checked.
    #[must_use]
    pub fn canonical_name(&self, name: &str) -> String {
        let name = name.trim().to_ascii_lowercase();
        self.column_aliases.get(&name).cloned().unwrap_or(name)
    }

    /// Physical table name for a context under a game type.
    #[must_use]
    pub fn table_name(&self, kind: ContextKind, game: &str) -> String {
        let prefix = self
            .game_type_prefixes
            .get(game)
            .map(String::as_str)
            .unwrap_or_default();
        format!("{prefix}{}", self.context(kind).base_table())
    }

    #[must_use]
    pub fn to_file(&self) -> CatalogFile {
        let entries = |context: &SchemaContext| {
            context
                .fields()
                .iter()
                .map(|field| FieldEntry {
                    name: field.name.clone(),
                    kind: field.kind,
                    summarisable: field.summarisable,
                    column: (field.column != field.name).then(|| field.column.clone()),
                })
                .collect()
        };
        CatalogFile {
            default_game_type: self.default_game_type.clone(),
            game_type_prefixes: self.game_type_prefixes.clone(),
            aggregate_function_types: self
                .aggregate_functions
                .iter()
                .map(|(name, kind)| {
                    let kind = match kind {
                        AggregateKind::Any => "*".to_string(),
                        AggregateKind::Only(kind) => kind.key().to_string(),
                    };
                    (name.clone(), kind)
                })
                .collect(),
            column_aliases: self.column_aliases.clone(),
            game_fields: entries(&self.game),
            milestone_fields: entries(&self.milestone),
            milestone_types: self.milestone.pivot_values.iter().cloned().collect(),
        }
    }
}

fn field_specs(entries: &[FieldEntry]) -> Vec<FieldSpec> {
    entries
        .iter()
        .map(|entry| {
            let name = entry.name.to_ascii_lowercase();
            FieldSpec {
                column: entry.column.clone().unwrap_or_else(|| name.clone()),
                name,
                kind: entry.kind,
                summarisable: entry.summarisable,
            }
        })
        .collect()
}

#[must_use]
pub fn json_schema() -> Value {
    let schema = schemars::schema_for!(CatalogFile);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated catalog schema: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregateKind, Catalog, ContextKind, ScalarKind};

    #[test]
    fn builtin_catalog_resolves_aliases_and_kinds() {
        let catalog = Catalog::builtin();

        let field = catalog.field("Class").expect("class alias should resolve");
        assert_eq!(field.name, "cls");
        assert_eq!(catalog.field("turn").map(|f| f.kind), Some(ScalarKind::Integer));
        assert_eq!(catalog.field("end").map(|f| f.kind), Some(ScalarKind::Date));
        assert!(catalog.field("nosuchfield").is_none());
    }

    #[test]
    fn summarisable_honours_flags_and_pivots() {
        let catalog = Catalog::builtin();

        assert!(catalog.summarisable("god"));
        assert!(!catalog.summarisable("tmsg"));
        assert!(catalog.summarisable("rune"));
    }

    #[test]
    fn table_names_use_game_type_prefixes() {
        let catalog = Catalog::builtin();

        assert_eq!(catalog.table_name(ContextKind::Game, "crawl"), "logrecord");
        assert_eq!(
            catalog.table_name(ContextKind::Milestone, "sprint"),
            "spr_milestone"
        );
        assert_eq!(catalog.game_type("SPRINT"), Some("sprint"));
    }

    #[test]
    fn aggregate_kinds_accept_matching_fields() {
        let catalog = Catalog::builtin();

        let avg = catalog.aggregate_functions()["avg"];
        assert_eq!(avg, AggregateKind::Only(ScalarKind::Integer));
        assert!(avg.accepts(Some(ScalarKind::Integer)));
        assert!(!avg.accepts(Some(ScalarKind::Text)));
        assert!(catalog.aggregate_functions()["cdist"].accepts(Some(ScalarKind::Text)));
    }

    #[test]
    fn catalog_round_trips_through_its_file_model() {
        let catalog = Catalog::builtin();
        let encoded = serde_json::to_string(&catalog.to_file()).expect("catalog should encode");
        let decoded = Catalog::from_json_str(&encoded).expect("catalog should decode");

        assert_eq!(decoded.to_file(), catalog.to_file());
    }

    #[test]
    fn rejects_catalog_without_default_game_prefix() {
        let mut file = Catalog::builtin().to_file();
        file.default_game_type = "nethack".to_string();

        let err = Catalog::from_file(file).expect_err("unknown default game must fail");
        assert!(
            err.to_string().contains("default game type"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_unknown_aggregate_kind() {
        let mut file = Catalog::builtin().to_file();
        file.aggregate_function_types
            .insert("median".to_string(), "float".to_string());

        let err = Catalog::from_file(file).expect_err("unknown aggregate kind must fail");
        assert!(err.to_string().contains("median"), "unexpected error: {err}");
    }

    #[test]
    fn json_schema_describes_catalog_document() {
        let schema = super::json_schema();
        let text = schema.to_string();
        assert!(text.contains("game_type_prefixes"));
        assert!(text.contains("milestone_fields"));
    }
}
