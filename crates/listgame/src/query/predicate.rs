use rusqlite::types::Value as SqlValue;

use crate::catalog::ScalarKind;
use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
    NotLike,
}

impl SqlOperator {
    /// Query-language operators, longest first so prefixes never shadow.
    pub const TOKENS: &'static [&'static str] =
        &["!==", "==", "!=", "<=", ">=", "=~", "!~", "=", "<", ">"];

    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "=" | "==" => Some(Self::Eq),
            "!=" | "!==" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            "=~" => Some(Self::Like),
            "!~" => Some(Self::NotLike),
            _ => None,
        }
    }

    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }

    const fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::NotLike)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub column: String,
    pub op: SqlOperator,
    pub value: SqlValue,
}

impl FieldPredicate {
    /// Binds `raw` according to the field's kind. `clause` is the user's
    /// original term, reported on a malformed value.
    pub fn bind(
        column: impl Into<String>,
        op: SqlOperator,
        kind: ScalarKind,
        raw: &str,
        clause: &str,
    ) -> Result<Self, QueryError> {
        let value = if op.is_pattern() {
            SqlValue::Text(like_pattern(raw))
        } else {
            match kind {
                ScalarKind::Integer => raw
                    .trim()
                    .parse::<i64>()
                    .map(SqlValue::Integer)
                    .map_err(|_| QueryError::malformed(clause))?,
                ScalarKind::Boolean => SqlValue::Integer(
                    parse_flag(raw).ok_or_else(|| QueryError::malformed(clause))?,
                ),
                ScalarKind::Date | ScalarKind::Text => SqlValue::Text(raw.to_string()),
            }
        };
        Ok(Self {
            column: column.into(),
            op,
            value,
        })
    }

    #[must_use]
    pub fn text(column: impl Into<String>, op: SqlOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: SqlValue::Text(value.into()),
        }
    }
}

fn like_pattern(raw: &str) -> String {
    if raw.contains(['*', '?', '%', '_']) {
        raw.replace('*', "%").replace('?', "_")
    } else {
        format!("%{raw}%")
    }
}

fn parse_flag(raw: &str) -> Option<i64> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(1),
        "n" | "no" | "false" | "0" => Some(0),
        _ => None,
    }
}

/// Boolean predicate tree. `And(vec![])` is the empty (always true) tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Field(FieldPredicate),
    Const(String),
}

impl Default for Predicate {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Predicate {
    #[must_use]
    pub fn compound(op: BoolOp, children: Vec<Predicate>) -> Self {
        match op {
            BoolOp::And => Self::And(children),
            BoolOp::Or => Self::Or(children),
        }
    }

    #[must_use]
    pub fn op(&self) -> Option<BoolOp> {
        match self {
            Self::And(_) => Some(BoolOp::And),
            Self::Or(_) => Some(BoolOp::Or),
            Self::Field(_) | Self::Const(_) => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.iter().all(Self::is_empty),
            Self::Field(_) | Self::Const(_) => false,
        }
    }

    /// Appends `node` under `op`: as a sibling when the root already uses
    /// `op`, otherwise by wrapping the old root and `node` in a new `op` node.
    pub fn add(&mut self, op: BoolOp, node: Predicate) {
        if self.op() == Some(op) {
            if let Self::And(children) | Self::Or(children) = self {
                children.push(node);
            }
            return;
        }
        if self.is_empty() {
            *self = Self::compound(op, vec![node]);
            return;
        }
        let old = std::mem::take(self);
        *self = Self::compound(op, vec![old, node]);
    }

    /// True if any field predicate reads a column qualified with `alias`.
    #[must_use]
    pub fn references_alias(&self, alias: &str) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().any(|child| child.references_alias(alias))
            }
            Self::Field(field) => field
                .column
                .strip_prefix(alias)
                .is_some_and(|rest| rest.starts_with('.')),
            Self::Const(_) => false,
        }
    }

    /// SQL text with `?` placeholders, and the values bound to them in order.
    #[must_use]
    pub fn render(&self) -> (String, Vec<SqlValue>) {
        let mut values = Vec::new();
        let text = self.render_into(&mut values);
        (text, values)
    }

    fn render_into(&self, values: &mut Vec<SqlValue>) -> String {
        match self {
            Self::Field(field) => {
                values.push(field.value.clone());
                format!("{} {} ?", field.column, field.op.sql())
            }
            Self::Const(fragment) => fragment.clone(),
            Self::And(children) | Self::Or(children) => {
                let op = self.op().map_or("AND", BoolOp::sql);
                children
                    .iter()
                    .filter(|child| !child.is_empty())
                    .map(|child| {
                        let clause = child.render_into(values);
                        if child.op().is_some() {
                            format!("({clause})")
                        } else {
                            clause
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&format!(" {op} "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoolOp, FieldPredicate, Predicate, SqlOperator};
    use crate::catalog::ScalarKind;
    use crate::error::QueryError;
    use rusqlite::types::Value as SqlValue;

    fn eq(column: &str, value: &str) -> Predicate {
        Predicate::Field(FieldPredicate::text(column, SqlOperator::Eq, value))
    }

    #[test]
    fn add_flattens_matching_operator() {
        let mut pred = Predicate::And(vec![eq("lg.a", "1"), eq("lg.b", "2")]);
        pred.add(BoolOp::And, eq("lg.c", "3"));

        assert_eq!(
            pred,
            Predicate::And(vec![eq("lg.a", "1"), eq("lg.b", "2"), eq("lg.c", "3")])
        );
    }

    #[test]
    fn add_wraps_on_operator_change() {
        let mut pred = Predicate::And(vec![eq("lg.a", "1"), eq("lg.b", "2")]);
        pred.add(BoolOp::Or, eq("lg.c", "3"));

        let (sql, values) = pred.render();
        assert_eq!(sql, "(lg.a = ? AND lg.b = ?) OR lg.c = ?");
        assert_eq!(
            values,
            vec![
                SqlValue::Text("1".to_string()),
                SqlValue::Text("2".to_string()),
                SqlValue::Text("3".to_string()),
            ]
        );
    }

    #[test]
    fn add_to_empty_tree_adopts_operator() {
        let mut pred = Predicate::default();
        pred.add(BoolOp::Or, eq("lg.a", "1"));

        assert_eq!(pred, Predicate::Or(vec![eq("lg.a", "1")]));
        assert_eq!(pred.render().0, "lg.a = ?");
    }

    #[test]
    fn render_keeps_values_aligned_with_placeholders() {
        let pred = Predicate::And(vec![
            Predicate::Const("mst.game_key = lg.game_key".to_string()),
            Predicate::Or(vec![eq("lg.god", "Trog"), eq("lg.god", "Okawaru")]),
            eq("lg.name", "Ell"),
        ]);

        let (sql, values) = pred.render();
        assert_eq!(
            sql,
            "mst.game_key = lg.game_key AND (lg.god = ? OR lg.god = ?) AND lg.name = ?"
        );
        assert_eq!(values.len(), sql.matches('?').count());
        assert_eq!(values[2], SqlValue::Text("Ell".to_string()));
    }

    #[test]
    fn empty_tree_renders_nothing() {
        let (sql, values) = Predicate::default().render();
        assert!(sql.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn references_alias_searches_whole_tree() {
        let pred = Predicate::And(vec![
            eq("mst.verb", "rune"),
            Predicate::Or(vec![eq("mst.xl", "1"), eq("lg.ktyp", "winning")]),
        ]);

        assert!(pred.references_alias("lg"));
        assert!(!pred.references_alias("l"));
        assert!(!Predicate::And(vec![eq("mst.lgx", "1")]).references_alias("lg"));
    }

    #[test]
    fn bind_converts_values_by_kind() {
        let xl = FieldPredicate::bind("lg.xl", SqlOperator::Ge, ScalarKind::Integer, "12", "xl>=12")
            .expect("integer should bind");
        assert_eq!(xl.value, SqlValue::Integer(12));

        let wiz = FieldPredicate::bind("lg.wiz", SqlOperator::Eq, ScalarKind::Boolean, "y", "wiz=y")
            .expect("flag should bind");
        assert_eq!(wiz.value, SqlValue::Integer(1));

        let killer =
            FieldPredicate::bind("lg.killer", SqlOperator::Like, ScalarKind::Text, "*orc", "k=~*orc")
                .expect("pattern should bind");
        assert_eq!(killer.value, SqlValue::Text("%orc".to_string()));

        let plain = FieldPredicate::bind("lg.tmsg", SqlOperator::Like, ScalarKind::Text, "orb", "x")
            .expect("substring pattern should bind");
        assert_eq!(plain.value, SqlValue::Text("%orb%".to_string()));
    }

    #[test]
    fn bind_rejects_non_numeric_integer() {
        let err = FieldPredicate::bind("lg.xl", SqlOperator::Eq, ScalarKind::Integer, "ten", "xl=ten")
            .expect_err("non-numeric integer must fail");
        assert_eq!(err, QueryError::malformed("xl=ten"));
    }
}
