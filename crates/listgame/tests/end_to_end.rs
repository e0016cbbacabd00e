use listgame::QueryError;
use listgame::catalog::{Catalog, ContextKind};
use listgame::exec::{SqliteDriver, execute};
use listgame::query::tokenize;
use listgame::sqlite::{ensure_sqlite_schema, insert_records, parse_jsonl_records};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rusqlite::Connection;

const GAMES: &str = r#"
{"name":"Ell","race":"Minotaur","cls":"Berserker","god":"Trog","xl":27,"ktyp":"winning","end":"2020-01-01 10:00:00","turn":50000,"sc":1000,"game_key":"g1"}
{"name":"Ell","race":"Minotaur","cls":"Fighter","god":"Trog","xl":12,"ktyp":"monster","end":"2020-01-02 10:00:00","turn":20000,"sc":200,"game_key":"g2"}
{"name":"Ell","race":"Spriggan","cls":"Enchanter","god":"Makhleb","xl":5,"ktyp":"monster","end":"2020-01-03 10:00:00","turn":5000,"sc":30,"game_key":"g3"}
{"name":"Sigmund","race":"Minotaur","cls":"Berserker","god":"Trog","xl":27,"ktyp":"winning","end":"2020-01-04 10:00:00","turn":60000,"sc":2000,"game_key":"g4"}
"#;

const MILESTONES: &str = r#"
{"name":"Ell","verb":"rune","noun":"barnacled","time":"2019-12-31 09:00:00","game_key":"g1"}
{"name":"Ell","verb":"rune","noun":"serpentine","time":"2019-12-31 09:30:00","game_key":"g1"}
{"name":"Ell","verb":"uniq","noun":"Sigmund","time":"2019-12-31 08:00:00","game_key":"g1"}
{"name":"Sigmund","verb":"rune","noun":"barnacled","time":"2020-01-04 09:00:00","game_key":"g4"}
"#;

fn fixture(catalog: &Catalog) -> SqliteDriver {
    let mut connection = Connection::open_in_memory().expect("in-memory sqlite should open");
    ensure_sqlite_schema(&connection, catalog).expect("schema creation should succeed");
    for (kind, input) in [
        (ContextKind::Game, GAMES),
        (ContextKind::Milestone, MILESTONES),
    ] {
        let records = parse_jsonl_records(input).expect("fixture records should parse");
        insert_records(&mut connection, catalog, kind, "crawl", &records)
            .expect("fixture records should load");
    }
    SqliteDriver::new(connection)
}

fn run(context: ContextKind, text: &str) -> Result<String, QueryError> {
    let catalog = Catalog::builtin();
    let driver = fixture(&catalog);
    execute(
        &driver,
        &catalog,
        context,
        "Ell",
        &tokenize(&[text]),
        &mut StdRng::seed_from_u64(42),
    )
}

fn lg(text: &str) -> String {
    run(ContextKind::Game, text).expect("game query should succeed")
}

fn lm(text: &str) -> String {
    run(ContextKind::Milestone, text).expect("milestone query should succeed")
}

#[test]
fn latest_game_of_the_default_actor() {
    let reply = lg("");
    assert!(reply.starts_with("1/3. id=3, name=Ell, race=Spriggan"), "{reply}");
    assert!(reply.contains("god=Makhleb"), "{reply}");
    assert!(reply.contains("end=2020-01-03 10:00:00"), "{reply}");
}

#[test]
fn ordinal_index_counts_back_from_latest() {
    let reply = lg("2");
    assert!(reply.starts_with("3/3. id=1, name=Ell"), "{reply}");

    let err = run(ContextKind::Game, "3").expect_err("index past the end must fail");
    assert_eq!(err, QueryError::IndexOutOfRange { index: 3 });
    assert_eq!(err.to_string(), "Index out of range: 3");
}

#[test]
fn any_actor_with_a_field_filter() {
    let reply = lg("* ktyp=winning");
    assert!(reply.starts_with("1/2. id=4, name=Sigmund"), "{reply}");
}

#[test]
fn max_sort_puts_largest_first() {
    let reply = lg("* max=xl");
    assert!(reply.starts_with("1/4. id=4, name=Sigmund"), "{reply}");
    let reply = lg("* min=xl");
    assert!(reply.starts_with("1/4. id=3, name=Ell"), "{reply}");
}

#[test]
fn tied_sort_values_still_give_each_index_its_own_row() {
    let replies: Vec<String> = (0..4).map(|index| lg(&format!("* max=xl {index}"))).collect();
    assert!(replies[0].starts_with("1/4. id=4,"), "{}", replies[0]);
    assert!(replies[1].starts_with("2/4. id=1,"), "{}", replies[1]);
    assert!(replies[2].starts_with("3/4. id=2,"), "{}", replies[2]);
    assert!(replies[3].starts_with("4/4. id=3,"), "{}", replies[3]);
}

#[test]
fn random_pick_reads_one_matching_row() {
    let reply = lg("* -random");
    assert!(reply.contains("/4. id="), "{reply}");
}

#[test]
fn empty_match_is_a_reply_not_an_error() {
    assert_eq!(lg("* god=Xom"), "No games for * god=Xom.");
    assert_eq!(lg("* s=god god=Xom"), "No games for * s=god god=Xom.");
}

#[test]
fn grouped_report_by_god() {
    assert_eq!(lg("* s=god"), "4 games for * s=god: 3x Trog, Makhleb");
    assert_eq!(lg("s=god"), "3 games for Ell s=god: 2x Trog, Makhleb");
}

#[test]
fn ratio_report_merges_fragments() {
    assert_eq!(
        lg("* s=god / ktyp=winning"),
        "2/4 games for * s=god / ktyp=winning: 2/3x Trog [66.67%], 0/1x Makhleb [0.00%]"
    );
}

#[test]
fn ungrouped_aggregate_report() {
    assert_eq!(
        lg("* x=avg(xl)"),
        "4 games for * x=avg(xl): avg(xl)=17.75"
    );
}

#[test]
fn two_level_grouping_report() {
    assert_eq!(
        lg("* s=race,cls"),
        "4 games for * s=race,cls: 3x Minotaur (2x Berserker, Fighter), Spriggan (Enchanter)"
    );
}

#[test]
fn milestone_type_groups_by_noun() {
    assert_eq!(
        lm("* s=rune"),
        "3 milestones for * s=rune: 2x barnacled, serpentine"
    );
}

#[test]
fn milestone_query_on_game_field_joins_games() {
    assert_eq!(
        lm("* s=rune sc>1500"),
        "One milestone for * s=rune sc>1500: barnacled"
    );
}

#[test]
fn rejected_queries_surface_typed_errors() {
    let err = run(ContextKind::Game, "* s=god,God").expect_err("duplicate group must fail");
    assert!(matches!(err, QueryError::DuplicateGroupField { .. }), "{err:?}");
    assert!(err.is_input_error());

    let err = run(ContextKind::Game, "* o=max(xl) s=god").expect_err("unknown sort must fail");
    assert!(matches!(err, QueryError::UnknownSortField { .. }), "{err:?}");
}
