//! Table naming and inheritance inference.
//!
//! Everything here is a pure function of the declared metadata. The
//! registry feeds it the model's resolution order (the model, its mixins,
//! then each ancestor followed by that ancestor's mixins) and the set of
//! tables that already exist.

use std::sync::LazyLock;

use regex::Regex;
use sqlwrap_types::TableStrategy;

static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));

const UNCOUNTABLES: &[&str] = &[
    "equipment",
    "fish",
    "information",
    "jeans",
    "money",
    "rice",
    "series",
    "sheep",
    "species",
];

/// `(singular, plural)` pairs matched at the end of a word.
const IRREGULARS: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("human", "humans"),
    ("child", "children"),
    ("sex", "sexes"),
    ("move", "moves"),
    ("cow", "kine"),
    ("zombie", "zombies"),
];

/// Suffix rules, tried in order. The first matching rule wins.
const PLURAL_RULES: &[(&str, &str)] = &[
    (r"(?i)(quiz)$", "${1}zes"),
    (r"(?i)^(oxen)$", "${1}"),
    (r"(?i)^(ox)$", "${1}en"),
    (r"(?i)(m|l)ice$", "${1}ice"),
    (r"(?i)(m|l)ouse$", "${1}ice"),
    (r"(?i)(passer)s?by$", "${1}sby"),
    (r"(?i)(matr|vert|ind)(?:ix|ex)$", "${1}ices"),
    (r"(?i)(x|ch|ss|sh)$", "${1}es"),
    (r"(?i)([^aeiouy]|qu)y$", "${1}ies"),
    (r"(?i)(hive)$", "${1}s"),
    (r"(?i)([lr])f$", "${1}ves"),
    (r"(?i)([^f])fe$", "${1}ves"),
    (r"(?i)sis$", "ses"),
    (r"(?i)([ti])a$", "${1}a"),
    (r"(?i)([ti])um$", "${1}a"),
    (r"(?i)(buffal|potat|tomat)o$", "${1}oes"),
    (r"(?i)(bu)s$", "${1}ses"),
    (r"(?i)(alias|status)$", "${1}es"),
    (r"(?i)(octop|vir)i$", "${1}i"),
    (r"(?i)(octop|vir)us$", "${1}i"),
    (r"(?i)^(ax|test)is$", "${1}es"),
    (r"(?i)s$", "s"),
    (r"$", "s"),
];

static IRREGULAR_RULES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    // Later pairs take precedence over earlier ones.
    IRREGULARS
        .iter()
        .rev()
        .map(|(singular, plural)| {
            let (head, tail) = singular.split_at(1);
            if plural.starts_with(head) {
                (
                    Regex::new(&format!(r"(?i)({head}){tail}$")).expect("valid regex"),
                    format!("${{1}}{}", &plural[1..]),
                )
            } else {
                (
                    Regex::new(&format!(r"(?i){singular}$")).expect("valid regex"),
                    (*plural).to_string(),
                )
            }
        })
        .collect()
});

static SUFFIX_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    PLURAL_RULES
        .iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), *replacement))
        .collect()
});

/// Converts a CamelCase name to snake_case.
///
/// ```
/// use sqlwrap_db::naming::underscore;
///
/// assert_eq!(underscore("HTTPRequest"), "http_request");
/// assert_eq!(underscore("UserTestCase"), "user_test_case");
/// ```
pub fn underscore(word: &str) -> String {
    let word = ACRONYM_BOUNDARY.replace_all(word, "${1}_${2}");
    let word = WORD_BOUNDARY.replace_all(&word, "${1}_${2}");
    word.replace('-', "_").to_lowercase()
}

/// Returns the English plural of `word`.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    if UNCOUNTABLES.contains(&word.to_lowercase().as_str()) {
        return word.to_string();
    }

    for (rule, replacement) in IRREGULAR_RULES.iter() {
        if rule.is_match(word) {
            return rule.replacen(word, 1, replacement.as_str()).into_owned();
        }
    }

    for (rule, replacement) in SUFFIX_RULES.iter() {
        if rule.is_match(word) {
            return rule.replacen(word, 1, *replacement).into_owned();
        }
    }
    word.to_string()
}

/// Generates a table name from a model name: underscored, then pluralized.
///
/// ```
/// use sqlwrap_db::naming::table_name_for;
///
/// assert_eq!(table_name_for("Document"), "documents");
/// assert_eq!(table_name_for("ToDo"), "to_dos");
/// assert_eq!(table_name_for("URL"), "urls");
/// ```
pub fn table_name_for(model_name: &str) -> String {
    pluralize(&underscore(model_name))
}

/// What kind of declaration an entry of the resolution order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// The model being resolved.
    Model,
    /// A mixin of the model or of an ancestor.
    Mixin,
    /// An abstract ancestor model.
    AbstractAncestor,
    /// An ancestor model that owns or shares a table.
    ConcreteAncestor,
}

/// One entry of a model's resolution order, as far as naming cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameSource<'a> {
    /// Kind of declaration.
    pub kind: DeclKind,
    /// Table name explicitly declared by this entry.
    pub table_name: Option<&'a str>,
}

/// Decides whether a table name must be generated for a model.
///
/// `order` starts with the model itself. The first entry that declares a
/// name decides: a concrete ancestor's name is never inherited, any other
/// declared name is used as-is. Abstract models never get a name.
pub fn should_set_tablename(is_abstract: bool, order: &[NameSource<'_>]) -> bool {
    if is_abstract {
        return false;
    }
    order
        .iter()
        .find(|source| source.table_name.is_some())
        .map_or(true, |source| source.kind == DeclKind::ConcreteAncestor)
}

/// Resolves the table name a model would use, before inheritance is applied.
///
/// Returns `None` for abstract models.
pub fn resolve_table_name(
    model_name: &str,
    is_abstract: bool,
    order: &[NameSource<'_>],
) -> Option<String> {
    if is_abstract {
        return None;
    }
    if should_set_tablename(is_abstract, order) {
        return Some(table_name_for(model_name));
    }
    order
        .iter()
        .find_map(|source| source.table_name)
        .map(str::to_string)
}

/// Inputs to [`decide_table`].
#[derive(Debug, Clone, Copy)]
pub struct TableDecision<'a> {
    /// Table name chosen by [`resolve_table_name`].
    pub table_name: &'a str,
    /// The model, its mixins, or its abstract ancestors declare a primary key.
    pub declares_primary_key: bool,
    /// Table of the nearest concrete ancestor, if any.
    pub parent_table: Option<&'a str>,
}

/// Decides how a concrete model maps onto tables.
///
/// `table_exists` reports whether a table is already registered.
pub fn decide_table(
    decision: TableDecision<'_>,
    table_exists: impl Fn(&str) -> bool,
) -> TableStrategy {
    let TableDecision {
        table_name,
        declares_primary_key,
        parent_table,
    } = decision;

    if table_exists(table_name) {
        return match parent_table {
            Some(parent) if parent == table_name => TableStrategy::SingleTable {
                table: table_name.to_string(),
            },
            _ => TableStrategy::Own {
                table: table_name.to_string(),
            },
        };
    }

    match (declares_primary_key, parent_table) {
        (true, Some(parent)) => TableStrategy::Joined {
            table: table_name.to_string(),
            parent_table: parent.to_string(),
        },
        (_, None) => TableStrategy::Own {
            table: table_name.to_string(),
        },
        (false, Some(parent)) => TableStrategy::SingleTable {
            table: parent.to_string(),
        },
    }
}
