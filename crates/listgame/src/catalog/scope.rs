use super::{Catalog, ContextKind, FieldSpec, ScalarKind, SchemaContext};
use crate::error::QueryError;

/// Where a field name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOwner<'a> {
    Column {
        context: ContextKind,
        spec: &'a FieldSpec,
    },
    /// A milestone type used as a synthetic group-by key.
    Pivot { context: ContextKind },
}

impl FieldOwner<'_> {
    #[must_use]
    pub fn context(&self) -> ContextKind {
        match self {
            Self::Column { context, .. } | Self::Pivot { context } => *context,
        }
    }
}

/// The explicit per-request context: which catalog, which schema context,
/// which game type. Copied into every parse and build step.
#[derive(Debug, Clone, Copy)]
pub struct QueryScope<'a> {
    catalog: &'a Catalog,
    context: ContextKind,
    game: &'a str,
}

impl<'a> QueryScope<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog, context: ContextKind, game: &'a str) -> Self {
        Self {
            catalog,
            context,
            game,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    #[must_use]
    pub fn context_kind(&self) -> ContextKind {
        self.context
    }

    #[must_use]
    pub fn schema(&self) -> &'a SchemaContext {
        self.catalog.context(self.context)
    }

    #[must_use]
    pub fn game(&self) -> &'a str {
        self.game
    }

    /// `"<prefixed table> <alias>"` for the given context.
    #[must_use]
    pub fn table_ref(&self, kind: ContextKind) -> String {
        format!(
            "{} {}",
            self.catalog.table_name(kind, self.game),
            self.catalog.context(kind).alias()
        )
    }

    #[must_use]
    pub fn resolve(&self, field: &str) -> Option<FieldOwner<'a>> {
        let (prefix, suffix) = split_field(field);
        lookup(self.catalog, self.context, prefix, suffix)
    }

    /// Lower-cases and alias-resolves a user field name, keeping any
    /// `alias:` prefix, and fails if nothing in scope owns it.
    pub fn canonicalise_field(&self, raw: &str) -> Result<String, QueryError> {
        let raw = raw.trim();
        let (prefix, suffix) = split_field(raw);
        let suffix = self.catalog.canonical_name(suffix);
        let field = match prefix {
            Some(prefix) => format!("{}:{suffix}", prefix.to_ascii_lowercase()),
            None => suffix,
        };
        if self.resolve(&field).is_none() {
            return Err(QueryError::unknown_field(field));
        }
        Ok(field)
    }

    #[must_use]
    pub fn field_kind(&self, field: &str) -> Option<ScalarKind> {
        match self.resolve(field)? {
            FieldOwner::Column { spec, .. } => Some(spec.kind),
            FieldOwner::Pivot { .. } => Some(ScalarKind::Text),
        }
    }

    /// Qualified SQL column (`lg.tend`) for a canonical field.
    pub fn dbfield(&self, field: &str) -> Result<String, QueryError> {
        match self.resolve(field) {
            Some(FieldOwner::Column { context, spec }) => Ok(format!(
                "{}.{}",
                self.catalog.context(context).alias(),
                spec.column
            )),
            _ => Err(QueryError::unknown_field(field)),
        }
    }

    #[must_use]
    pub fn summarisable(&self, field: &str) -> bool {
        match self.resolve(field) {
            Some(FieldOwner::Column { spec, .. }) => spec.summarisable,
            Some(FieldOwner::Pivot { .. }) => true,
            None => false,
        }
    }

    /// Summarisable without leaving the current context's own table.
    #[must_use]
    pub fn directly_summarisable(&self, field: &str) -> bool {
        self.resolve(field)
            .is_some_and(|owner| owner.context() == self.context)
            && self.summarisable(field)
    }

    #[must_use]
    pub fn is_pivot(&self, field: &str) -> bool {
        matches!(self.resolve(field), Some(FieldOwner::Pivot { .. }))
    }
}

fn split_field(field: &str) -> (Option<&str>, &str) {
    match field.split_once(':') {
        Some((prefix, suffix))
            if !prefix.is_empty()
                && !suffix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            (Some(prefix), suffix)
        }
        _ => (None, field),
    }
}

fn lookup<'a>(
    catalog: &'a Catalog,
    kind: ContextKind,
    prefix: Option<&str>,
    suffix: &str,
) -> Option<FieldOwner<'a>> {
    let schema = catalog.context(kind);
    let local = || {
        schema
            .field(suffix)
            .map(|spec| FieldOwner::Column {
                context: kind,
                spec,
            })
            .or_else(|| {
                schema
                    .is_pivot(suffix)
                    .then_some(FieldOwner::Pivot { context: kind })
            })
    };
    let fallback = || {
        kind.fallback()
            .and_then(|alt| lookup(catalog, alt, prefix, suffix))
    };

    match prefix {
        Some(prefix) if prefix.eq_ignore_ascii_case(schema.alias()) => local(),
        Some(_) => fallback(),
        None => local().or_else(fallback),
    }
}
