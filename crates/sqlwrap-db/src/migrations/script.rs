//! Revision scripts: file format, template, and chain ordering.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::MigrationError;

/// Template written by `init` and rendered by `revision`.
pub(crate) const TEMPLATE_FILE: &str = "script.sql.template";

pub(crate) const DEFAULT_TEMPLATE: &str = "\
-- revision: {revision}
-- parent: {parent}
-- message: {message}
-- created: {created}

-- migrate:up


-- migrate:down

";

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";
const SLUG_MAX: usize = 40;

/// One revision script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Revision id.
    pub id: String,
    /// Parent revision id; `None` for the first revision.
    pub parent: Option<String>,
    /// Human description.
    pub message: String,
    /// Creation timestamp as written in the header.
    pub created: Option<String>,
    /// Script file.
    pub path: PathBuf,
    /// `true` for the newest revision.
    pub is_head: bool,
    pub(crate) up: String,
    pub(crate) down: String,
}

impl Revision {
    /// SQL applied on upgrade.
    pub fn up_sql(&self) -> &str {
        &self.up
    }

    /// SQL applied on downgrade.
    pub fn down_sql(&self) -> &str {
        &self.down
    }

    /// One-line summary, or a multi-line block with `verbose`.
    ///
    /// `<parent> -> <id> (head), <message>`
    pub fn describe(&self, verbose: bool) -> String {
        let head = if self.is_head { " (head)" } else { "" };
        let parent = self.parent.as_deref().unwrap_or("<base>");
        if !verbose {
            return format!("{parent} -> {}{head}, {}", self.id, self.message);
        }

        let mut out = format!("Rev: {}{head}\nParent: {parent}\n", self.id);
        if let Some(created) = &self.created {
            out.push_str(&format!("Created: {created}\n"));
        }
        out.push_str(&format!("Path: {}\n\n    {}\n", self.path.display(), self.message));
        out
    }

    /// Parses a script file.
    pub(crate) fn parse(path: &Path, text: &str) -> Result<Self, MigrationError> {
        let script_error = |reason: &str| MigrationError::Script {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut id = None;
        let mut parent = None;
        let mut message = String::new();
        let mut created = None;
        let mut up = String::new();
        let mut down = String::new();
        let mut section = Section::Header;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed == UP_MARKER {
                section = Section::Up;
                continue;
            }
            if trimmed == DOWN_MARKER {
                section = Section::Down;
                continue;
            }
            match section {
                Section::Header => {
                    if let Some(value) = header_value(trimmed, "revision") {
                        id = Some(value.to_string()).filter(|v| !v.is_empty());
                    } else if let Some(value) = header_value(trimmed, "parent") {
                        parent = Some(value.to_string()).filter(|v| !v.is_empty());
                    } else if let Some(value) = header_value(trimmed, "message") {
                        message = value.to_string();
                    } else if let Some(value) = header_value(trimmed, "created") {
                        created = Some(value.to_string()).filter(|v| !v.is_empty());
                    }
                }
                Section::Up => push_line(&mut up, line),
                Section::Down => push_line(&mut down, line),
            }
        }

        let id = id.ok_or_else(|| script_error("missing `-- revision:` header"))?;
        if !text.lines().any(|l| l.trim() == UP_MARKER) {
            return Err(script_error("missing `-- migrate:up` section"));
        }

        Ok(Self {
            id,
            parent,
            message,
            created,
            path: path.to_path_buf(),
            is_head: false,
            up: up.trim().to_string(),
            down: down.trim().to_string(),
        })
    }
}

enum Section {
    Header,
    Up,
    Down,
}

fn header_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix("--")?
        .trim_start()
        .strip_prefix(key)?
        .strip_prefix(':')
        .map(str::trim)
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push('\n');
}

/// Renders the template for a new revision.
pub(crate) fn render(
    template: &str,
    id: &str,
    parent: Option<&str>,
    message: &str,
    created: &str,
) -> String {
    let message = message.replace(['\r', '\n'], " ");
    template
        .replace("{revision}", id)
        .replace("{parent}", parent.unwrap_or(""))
        .replace("{message}", message.trim())
        .replace("{created}", created)
}

/// Lowercase words joined by `_`, at most 40 characters.
pub(crate) fn slugify(message: &str) -> String {
    let words: Vec<String> = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    let mut slug = String::new();
    for word in words {
        let extra = if slug.is_empty() { word.len() } else { word.len() + 1 };
        if !slug.is_empty() && slug.len() + extra > SLUG_MAX {
            break;
        }
        if !slug.is_empty() {
            slug.push('_');
        }
        slug.push_str(&word);
    }
    slug.truncate(SLUG_MAX);
    slug
}

/// Reads every `.sql` script in `dir` and orders them base first.
pub(crate) fn load_chain(dir: &Path) -> Result<Vec<Revision>, MigrationError> {
    let entries = fs::read_dir(dir).map_err(|source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| MigrationError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut revisions = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path).map_err(|source| MigrationError::Io {
            path: path.clone(),
            source,
        })?;
        revisions.push(Revision::parse(&path, &text)?);
    }
    order_chain(revisions)
}

/// Orders revisions from base to head, rejecting anything but one line.
pub(crate) fn order_chain(revisions: Vec<Revision>) -> Result<Vec<Revision>, MigrationError> {
    if revisions.is_empty() {
        return Ok(revisions);
    }

    let mut ids = HashSet::new();
    for rev in &revisions {
        if !ids.insert(rev.id.as_str()) {
            return Err(MigrationError::Chain(format!("duplicate revision '{}'", rev.id)));
        }
    }

    let mut roots = Vec::new();
    let mut children: HashMap<&str, usize> = HashMap::new();
    for (index, rev) in revisions.iter().enumerate() {
        match &rev.parent {
            None => roots.push(index),
            Some(parent) => {
                if !ids.contains(parent.as_str()) {
                    return Err(MigrationError::Chain(format!(
                        "revision '{}' has unknown parent '{parent}'",
                        rev.id
                    )));
                }
                if children.insert(parent.as_str(), index).is_some() {
                    return Err(MigrationError::Chain(format!(
                        "revision '{parent}' has more than one child"
                    )));
                }
            }
        }
    }

    let [root] = roots.as_slice() else {
        return Err(MigrationError::Chain(format!(
            "expected exactly one base revision, found {}",
            roots.len()
        )));
    };

    let mut order = vec![*root];
    while let Some(&next) = children.get(revisions[order[order.len() - 1]].id.as_str()) {
        order.push(next);
    }
    if order.len() != revisions.len() {
        return Err(MigrationError::Chain(
            "some revisions are not reachable from the base revision".to_string(),
        ));
    }

    let mut slots: Vec<Option<Revision>> = revisions.into_iter().map(Some).collect();
    let mut chain: Vec<Revision> = order.into_iter().filter_map(|i| slots[i].take()).collect();
    if let Some(head) = chain.last_mut() {
        head.is_head = true;
    }
    Ok(chain)
}
