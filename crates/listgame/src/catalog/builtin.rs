use std::collections::BTreeMap;

use super::{CatalogFile, FieldEntry, ScalarKind};

use ScalarKind::{Boolean, Date, Integer, Text};

// (name, kind, summarisable, column)
const GAME_FIELDS: &[(&str, ScalarKind, bool, Option<&str>)] = &[
    ("id", Integer, false, None),
    ("file", Text, true, None),
    ("src", Text, true, None),
    ("v", Text, true, None),
    ("cv", Text, true, None),
    ("name", Text, true, None),
    ("race", Text, true, None),
    ("cls", Text, true, None),
    ("char", Text, true, Some("charabbrev")),
    ("xl", Integer, true, None),
    ("sk", Text, true, None),
    ("sklev", Integer, true, None),
    ("title", Text, true, None),
    ("ktyp", Text, true, None),
    ("killer", Text, true, None),
    ("kaux", Text, true, None),
    ("place", Text, true, None),
    ("br", Text, true, None),
    ("lvl", Integer, true, None),
    ("ltyp", Text, true, None),
    ("hp", Integer, true, None),
    ("mhp", Integer, true, None),
    ("mmhp", Integer, true, None),
    ("dam", Integer, true, None),
    ("str", Integer, true, Some("sstr")),
    ("int", Integer, true, Some("sint")),
    ("dex", Integer, true, Some("sdex")),
    ("god", Text, true, None),
    ("piety", Integer, true, None),
    ("pen", Integer, true, None),
    ("wiz", Boolean, true, None),
    ("start", Date, true, Some("tstart")),
    ("end", Date, true, Some("tend")),
    ("dur", Integer, true, None),
    ("turn", Integer, true, None),
    ("urune", Integer, true, None),
    ("nrune", Integer, true, None),
    ("tmsg", Text, false, None),
    ("vmsg", Text, false, None),
    ("splat", Text, true, None),
    ("sc", Integer, true, None),
    ("tiles", Boolean, true, None),
    ("game_key", Text, false, None),
];

const MILESTONE_FIELDS: &[(&str, ScalarKind, bool, Option<&str>)] = &[
    ("id", Integer, false, None),
    ("file", Text, true, None),
    ("src", Text, true, None),
    ("v", Text, true, None),
    ("cv", Text, true, None),
    ("name", Text, true, None),
    ("race", Text, true, None),
    ("cls", Text, true, None),
    ("char", Text, true, Some("charabbrev")),
    ("xl", Integer, true, None),
    ("sk", Text, true, None),
    ("sklev", Integer, true, None),
    ("title", Text, true, None),
    ("place", Text, true, None),
    ("br", Text, true, None),
    ("lvl", Integer, true, None),
    ("ltyp", Text, true, None),
    ("hp", Integer, true, None),
    ("mhp", Integer, true, None),
    ("mmhp", Integer, true, None),
    ("god", Text, true, None),
    ("dur", Integer, true, None),
    ("turn", Integer, true, None),
    ("urune", Integer, true, None),
    ("nrune", Integer, true, None),
    ("time", Date, true, Some("mtime")),
    ("rstart", Date, true, None),
    ("verb", Text, true, None),
    ("noun", Text, true, None),
    ("milestone", Text, false, None),
    ("game_key", Text, false, None),
];

const MILESTONE_TYPES: &[&str] = &[
    "abyss.enter",
    "abyss.exit",
    "br.enter",
    "br.end",
    "god.worship",
    "god.renounce",
    "god.mollify",
    "rune",
    "orb",
    "uniq",
    "ghost",
    "shaft",
    "sacrifice",
];

const AGGREGATES: &[(&str, &str)] = &[
    ("avg", "integer"),
    ("cdist", "*"),
    ("max", "*"),
    ("min", "*"),
    ("sum", "integer"),
];

const ALIASES: &[(&str, &str)] = &[
    ("class", "cls"),
    ("role", "cls"),
    ("species", "race"),
    ("sp", "race"),
    ("ch", "char"),
    ("gid", "game_key"),
    ("k", "killer"),
    ("ki", "killer"),
    ("ktype", "ktyp"),
    ("score", "sc"),
    ("turns", "turn"),
    ("duration", "dur"),
    ("version", "v"),
    ("server", "src"),
    ("runes", "urune"),
    ("type", "verb"),
];

const GAME_TYPES: &[(&str, &str)] = &[("crawl", ""), ("sprint", "spr_"), ("zotdef", "zot_")];

pub(super) fn catalog_file() -> CatalogFile {
    CatalogFile {
        default_game_type: "crawl".to_string(),
        game_type_prefixes: pairs(GAME_TYPES),
        aggregate_function_types: pairs(AGGREGATES),
        column_aliases: pairs(ALIASES),
        game_fields: entries(GAME_FIELDS),
        milestone_fields: entries(MILESTONE_FIELDS),
        milestone_types: MILESTONE_TYPES.iter().map(|t| (*t).to_string()).collect(),
    }
}

fn pairs(values: &[(&str, &str)]) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

fn entries(values: &[(&str, ScalarKind, bool, Option<&str>)]) -> Vec<FieldEntry> {
    values
        .iter()
        .map(|(name, kind, summarisable, column)| FieldEntry {
            name: (*name).to_string(),
            kind: *kind,
            summarisable: *summarisable,
            column: column.map(str::to_string),
        })
        .collect()
}
