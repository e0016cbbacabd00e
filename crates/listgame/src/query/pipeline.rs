//! Query Pipeline: turns one command's argument list into a [`QueryGroup`].

use std::sync::OnceLock;

use regex::Regex;

use super::crawl_query::{Actor, CrawlQuery};
use super::fields::{FieldParser, QueryFieldList, is_extra_clause, is_group_clause};
use super::predicate::{BoolOp, FieldPredicate, Predicate, SqlOperator};
use super::sort::{FilterPredicate, SortCondition, is_sort_clause, parse_sort_clause};
use crate::catalog::{Catalog, ContextKind, QueryScope, ScalarKind};
use crate::error::QueryError;

pub const COMBINATOR: &str = "/";
pub const RANDOM_MARKER: &str = "-random";
const OR_TOKEN: &str = "||";
const OPEN_GROUP: &str = "((";
const CLOSE_GROUP: &str = "))";

/// One or more queries reported together. Element 0 is the primary query;
/// further elements come from `/` fragments and share its sorts and filters.
#[derive(Debug, Clone)]
pub struct QueryGroup<'a> {
    queries: Vec<CrawlQuery<'a>>,
    sorts: Vec<SortCondition>,
    filters: Vec<FilterPredicate>,
    extra: QueryFieldList,
    description: String,
}

impl<'a> QueryGroup<'a> {
    #[must_use]
    pub fn queries(&self) -> &[CrawlQuery<'a>] {
        &self.queries
    }

    #[must_use]
    pub fn primary(&self) -> &CrawlQuery<'a> {
        &self.queries[0]
    }

    pub fn primary_mut(&mut self) -> &mut CrawlQuery<'a> {
        &mut self.queries[0]
    }

    #[must_use]
    pub fn sorts(&self) -> &[SortCondition] {
        &self.sorts
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterPredicate] {
        &self.filters
    }

    #[must_use]
    pub fn extra(&self) -> &QueryFieldList {
        &self.extra
    }

    /// Actor plus the user's query text, used in report headers.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn is_ratio(&self) -> bool {
        self.queries.len() > 1
    }

    #[must_use]
    pub fn entity_name(&self) -> &str {
        self.primary().scope().schema().entity_name()
    }
}

/// Splits raw command text into argument tokens.
#[must_use]
pub fn tokenize<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.as_ref().split_whitespace())
        .map(str::to_string)
        .collect()
}

pub fn parse_query<'a>(
    catalog: &'a Catalog,
    context: ContextKind,
    default_actor: &str,
    args: &[String],
) -> Result<QueryGroup<'a>, QueryError> {
    let input = args.join(" ");
    let scope = QueryScope::new(catalog, context, catalog.default_game_type());
    let mut parser = FieldParser::new(scope);

    let mut args = args.to_vec();
    let mut extra = match take_all(&mut args, |token| is_extra_clause(token)).as_slice() {
        [] => QueryFieldList::default(),
        [clause] => parser.parse_extra_clause(clause)?,
        [_, second, ..] => return Err(QueryError::malformed(second.as_str())),
    };

    let mut sorts = Vec::new();
    for clause in take_all(&mut args, |token| is_sort_clause(token)) {
        sorts.extend(parse_sort_clause(&clause, &extra)?);
    }

    let filters: Vec<FilterPredicate> = take_all(&mut args, |token| {
        FilterPredicate::recognise(token, &extra).is_some()
    })
    .iter()
    .filter_map(|token| FilterPredicate::recognise(token, &extra))
    .collect();

    let fragments = split_fragments(&args);
    let primary_args = &fragments[0];
    if fragments.len() > 1 {
        if sorts.is_empty() {
            sorts = parse_sort_clause("o=%", &extra)?;
        }
        if extra.is_empty() && !primary_args.iter().any(|token| is_group_clause(token)) {
            extra = parser.parse_extra_clause("x=n")?;
        }
    }

    let mut queries = Vec::with_capacity(fragments.len());
    queries.push(build_query(
        catalog,
        context,
        default_actor,
        primary_args.clone(),
        &extra,
        &mut parser,
    )?);
    for fragment in &fragments[1..] {
        let mut combined = primary_args.clone();
        combined.extend(fragment.iter().cloned());
        queries.push(build_query(
            catalog,
            context,
            default_actor,
            combined,
            &extra,
            &mut parser,
        )?);
    }

    if queries.len() > 1 && !queries.iter().all(CrawlQuery::is_aggregate) {
        return Err(QueryError::MixedAggregationAcrossFragments { input });
    }

    if sorts.is_empty() {
        if let Some(summarise) = queries[0].summarise() {
            sorts = if extra.is_empty() {
                vec![summarise.default_sort()]
            } else {
                extra.default_sorts()
            };
        }
    }

    let description = describe(queries[0].actor(), &input);
    Ok(QueryGroup {
        queries,
        sorts,
        filters,
        extra,
        description,
    })
}

fn build_query<'a>(
    catalog: &'a Catalog,
    context: ContextKind,
    default_actor: &str,
    args: Vec<String>,
    extra: &QueryFieldList,
    parser: &mut FieldParser<'_>,
) -> Result<CrawlQuery<'a>, QueryError> {
    let mut args = args;
    let original = args.join(" ");
    let random = !take_all(&mut args, |token| token.eq_ignore_ascii_case(RANDOM_MARKER)).is_empty();

    let summarise = match take_all(&mut args, |token| is_group_clause(token)).as_slice() {
        [] => None,
        [clause] => Some(parser.parse_group_clause(clause)?),
        [_, second, ..] => return Err(QueryError::malformed(second.as_str())),
    };

    let mut args = combine_split_operators(args);

    let actor = match take_first(&mut args, is_actor_token) {
        Some(token) if token == "*" => Actor::Any,
        Some(token) => {
            let name = token.trim_start_matches('@');
            if name.is_empty() {
                return Err(QueryError::malformed(token.as_str()));
            }
            Actor::Named(name.to_string())
        }
        None if default_actor.is_empty() || default_actor == "*" => Actor::Any,
        None => Actor::Named(default_actor.to_string()),
    };

    let index = match take_first(&mut args, |token| index_regex().is_match(token)) {
        Some(token) => parse_index(&token)?,
        None => 0,
    };

    let game = take_first(&mut args, |token| catalog.game_type(token).is_some())
        .and_then(|token| catalog.game_type(&token))
        .unwrap_or_else(|| catalog.default_game_type());

    let scope = QueryScope::new(catalog, context, game);
    let row_sorts = take_all(&mut args, |token| row_sort_regex().is_match(token));
    let argstr = describe(&actor, &original);

    let mut query = CrawlQuery::new(scope, actor, index, argstr)?;
    query.set_random(random);

    let predicate = parse_terms(scope, &args)?;
    match predicate {
        Predicate::And(children) => {
            for child in children {
                query.add_predicate(BoolOp::And, child);
            }
        }
        other => query.add_predicate(BoolOp::And, other),
    }

    for token in row_sorts {
        let Some(caps) = row_sort_regex().captures(&token) else {
            continue;
        };
        let largest_first = caps[1].eq_ignore_ascii_case("max");
        query.set_row_sort(&caps[2], largest_first)?;
    }

    if let Some(summarise) = summarise {
        if !extra.is_empty() && !extra.is_aggregate() {
            return Err(QueryError::InconsistentFieldKinds {
                clause: extra.source().to_string(),
            });
        }
        query.set_summarise(summarise);
    }
    query.set_extra(extra.clone());

    Ok(query)
}

/// Rejoins an operator that was split off its operands by the tokenizer:
/// `xl >= 10`, `xl>= 10` and `xl> -1` all become one term.
fn combine_split_operators(args: Vec<String>) -> Vec<String> {
    let mut combined: Vec<String> = Vec::with_capacity(args.len());
    let mut tokens = args.into_iter();
    while let Some(token) = tokens.next() {
        if SqlOperator::parse(&token).is_some() {
            if let Some(previous) = combined.last_mut() {
                previous.push_str(&token);
                if let Some(next) = tokens.next() {
                    previous.push_str(&next);
                }
                continue;
            }
        }

        let mut token = token;
        if ends_with_operator(&token) {
            if let Some(next) = tokens.next() {
                token.push_str(&next);
            }
        }
        combined.push(token);
    }
    combined
}

fn ends_with_operator(token: &str) -> bool {
    SqlOperator::TOKENS
        .iter()
        .any(|op| token.len() > op.len() && token.ends_with(op))
}

fn split_fragments(args: &[String]) -> Vec<Vec<String>> {
    args.split(|token| token == COMBINATOR)
        .map(<[String]>::to_vec)
        .collect()
}

fn parse_terms(scope: QueryScope<'_>, tokens: &[String]) -> Result<Predicate, QueryError> {
    let mut parser = TermParser {
        scope,
        tokens,
        pos: 0,
    };
    let predicate = parser.parse_or()?;
    match parser.peek() {
        Some(token) => Err(QueryError::malformed(token)),
        None => Ok(predicate),
    }
}

struct TermParser<'t, 'a> {
    scope: QueryScope<'a>,
    tokens: &'t [String],
    pos: usize,
}

impl<'t> TermParser<'t, '_> {
    fn peek(&self) -> Option<&'t str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn parse_or(&mut self) -> Result<Predicate, QueryError> {
        let mut branches = vec![self.parse_and()?];
        while self.peek() == Some(OR_TOKEN) {
            self.pos += 1;
            branches.push(self.parse_and()?);
        }
        if branches.len() == 1 {
            return Ok(branches.remove(0));
        }
        if branches.iter().any(Predicate::is_empty) {
            return Err(QueryError::malformed(OR_TOKEN));
        }
        Ok(Predicate::Or(branches))
    }

    fn parse_and(&mut self) -> Result<Predicate, QueryError> {
        let mut terms = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                OR_TOKEN | CLOSE_GROUP => break,
                OPEN_GROUP => {
                    self.pos += 1;
                    let inner = self.parse_or()?;
                    if self.peek() != Some(CLOSE_GROUP) {
                        return Err(QueryError::malformed(OPEN_GROUP));
                    }
                    self.pos += 1;
                    terms.push(inner);
                }
                _ => {
                    terms.push(field_term(self.scope, token)?);
                    self.pos += 1;
                }
            }
        }
        if terms.len() == 1 {
            return Ok(terms.remove(0));
        }
        Ok(Predicate::And(terms))
    }
}

fn field_term(scope: QueryScope<'_>, token: &str) -> Result<Predicate, QueryError> {
    let caps = field_term_regex()
        .captures(token)
        .ok_or_else(|| QueryError::malformed(token))?;
    let op = SqlOperator::parse(&caps[2]).ok_or_else(|| QueryError::malformed(token))?;
    let field = scope.canonicalise_field(&caps[1])?;
    let column = scope.dbfield(&field)?;
    let kind = scope.field_kind(&field).unwrap_or(ScalarKind::Text);
    let predicate = FieldPredicate::bind(column, op, kind, &caps[3], token)?;
    Ok(Predicate::Field(predicate))
}

fn parse_index(token: &str) -> Result<i64, QueryError> {
    let bad = || QueryError::BadIndex {
        index: token.to_string(),
    };
    if token.starts_with('-') {
        return Err(bad());
    }
    token
        .trim_start_matches('+')
        .parse::<i64>()
        .map_err(|_| bad())
}

fn is_actor_token(token: &str) -> bool {
    token == "*" || token.starts_with('@')
}

fn describe(actor: &Actor, rest: &str) -> String {
    let rest: Vec<&str> = rest
        .split_whitespace()
        .filter(|token| !is_actor_token(token))
        .collect();
    if rest.is_empty() {
        actor.label().to_string()
    } else {
        format!("{} {}", actor.label(), rest.join(" "))
    }
}

fn take_all(args: &mut Vec<String>, mut matches: impl FnMut(&str) -> bool) -> Vec<String> {
    let mut taken = Vec::new();
    args.retain(|token| {
        if matches(token.as_str()) {
            taken.push(token.clone());
            false
        } else {
            true
        }
    });
    taken
}

fn take_first(args: &mut Vec<String>, matches: impl Fn(&str) -> bool) -> Option<String> {
    let position = args.iter().position(|token| matches(token.as_str()))?;
    Some(args.remove(position))
}

fn index_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[+-]?\d+$").expect("index regex should compile"))
}

fn row_sort_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(?i)(max|min)=([A-Za-z_][\w.:]*)$").expect("row sort regex should compile")
    })
}

fn field_term_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][\w.:]*)(!==|==|!=|<=|>=|=~|!~|=|<|>)(.*)$")
            .expect("field term regex should compile")
    })
}
