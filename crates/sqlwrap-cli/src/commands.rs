//! `sqlwrap db …` command handlers.
//!
//! Handlers write their report to `out` so they can be exercised against
//! a buffer; `main` passes stdout.

use std::io::Write;

use sqlwrap_db::{MigrationError, Migrations, Revision};
use sqlwrap_paginator::{PageSlot, Paginator};
use sqlwrap_types::{PaginationDefaults, MIN_SHOWMAX};

use crate::DbCommand;

/// Errors surfaced by a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The migration operation failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Writing the report failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Runs one command against an opened scripts folder.
pub fn run(
    migrations: &Migrations,
    command: DbCommand,
    pagination: PaginationDefaults,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match command {
        DbCommand::Init => {
            migrations.init()?;
            writeln!(out, "Migrations folder ready at {}", migrations.path().display())?;
        }
        DbCommand::Revision { message, parent } => {
            let rev = migrations.revision(&message, parent.as_deref())?;
            writeln!(out, "Generated {}", rev.path.display())?;
        }
        DbCommand::Upgrade { target, sql } => {
            if sql {
                let range = if target.contains(':') {
                    target
                } else {
                    format!("base:{target}")
                };
                write!(out, "{}", migrations.upgrade_sql(&range)?)?;
            } else {
                let applied = migrations.upgrade(&target)?;
                report(out, "Upgraded", &applied)?;
            }
        }
        DbCommand::Downgrade { target, sql } => {
            if sql {
                let range = if target.contains(':') {
                    target
                } else {
                    format!("head:{target}")
                };
                write!(out, "{}", migrations.downgrade_sql(&range)?)?;
            } else {
                let reverted = migrations.downgrade(&target)?;
                report(out, "Downgraded", &reverted)?;
            }
        }
        DbCommand::History {
            range,
            verbose,
            page,
            per_page,
        } => {
            let (start, end) = match range.as_deref().map(|r| r.split_once(':')) {
                Some(Some((start, end))) => (non_empty(start), non_empty(end)),
                Some(None) => (range.as_deref(), None),
                None => (None, None),
            };
            let mut revisions = migrations.history(start, end)?;
            revisions.reverse();
            history(out, revisions, verbose, page, per_page, pagination)?;
        }
        DbCommand::Current { verbose } => match migrations.current()? {
            Some(rev) => writeln!(out, "{}", rev.describe(verbose))?,
            None => writeln!(out, "<base>")?,
        },
        DbCommand::Head { verbose } => match migrations.head()? {
            Some(rev) => writeln!(out, "{}", rev.describe(verbose))?,
            None => writeln!(out, "No revisions")?,
        },
        DbCommand::Stamp { target, purge } => {
            let stamped = migrations.stamp(&target, purge)?;
            let id = stamped.as_ref().map_or("<base>", |r| r.id.as_str());
            writeln!(out, "Stamped {id}")?;
        }
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

fn report(out: &mut impl Write, verb: &str, revisions: &[Revision]) -> std::io::Result<()> {
    if revisions.is_empty() {
        return writeln!(out, "Nothing to do");
    }
    for rev in revisions {
        writeln!(out, "{verb} {}", rev.describe(false))?;
    }
    Ok(())
}

fn history(
    out: &mut impl Write,
    revisions: Vec<Revision>,
    verbose: bool,
    page: Option<String>,
    per_page: Option<u64>,
    defaults: PaginationDefaults,
) -> Result<(), CommandError> {
    let Some(page) = page else {
        for rev in &revisions {
            writeln!(out, "{}", rev.describe(verbose))?;
        }
        return Ok(());
    };

    let per_page = per_page.filter(|n| *n > 0).unwrap_or(defaults.per_page);
    let built = Paginator::builder(revisions)
        .page(page.as_str())
        .per_page(per_page)
        .padding(defaults.padding)
        .build();
    let paginator = match built {
        Ok(paginator) => paginator,
        Err(never) => match never {},
    };
    let items = match paginator.items() {
        Ok(items) => items,
        Err(never) => match never {},
    };

    for rev in &items {
        writeln!(out, "{}", rev.describe(verbose))?;
    }
    if paginator.is_paginated() {
        let pages: Vec<String> = paginator
            .get_pages(defaults.showmax.max(MIN_SHOWMAX))
            .into_iter()
            .map(|slot| match slot {
                PageSlot::Page(n) if n == paginator.page() => format!("[{n}]"),
                other => other.to_string(),
            })
            .collect();
        writeln!(
            out,
            "\nShowing {} of {} revisions. Pages: {}",
            paginator.get_range("-"),
            paginator.total(),
            pages.join(" ")
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlwrap_db::Database;

    use super::*;

    fn setup() -> (tempfile::TempDir, Migrations) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let url = format!("sqlite:///{}", dir.path().join("cli.db").display());
        let db = Database::connect(&url).expect("should open database");
        let migrations = Migrations::new(&db, dir.path().join("migrations")).expect("should construct");
        (dir, migrations)
    }

    fn exec(m: &Migrations, command: DbCommand) -> String {
        let mut out = Vec::new();
        run(m, command, PaginationDefaults::default(), &mut out).expect("should run command");
        String::from_utf8(out).expect("should be utf-8")
    }

    fn revision(m: &Migrations, message: &str) -> String {
        exec(
            m,
            DbCommand::Revision {
                message: message.to_string(),
                parent: None,
            },
        )
    }

    #[test]
    fn revision_upgrade_and_current() {
        let (_dir, m) = setup();
        assert!(revision(&m, "first").starts_with("Generated "));
        revision(&m, "second");

        let output = exec(
            &m,
            DbCommand::Upgrade {
                target: "head".into(),
                sql: false,
            },
        );
        assert_eq!(output.lines().count(), 2);
        assert!(output.contains("(head), second"));

        let current = exec(&m, DbCommand::Current { verbose: false });
        assert!(current.trim_end().ends_with("(head), second"));

        let again = exec(
            &m,
            DbCommand::Upgrade {
                target: "head".into(),
                sql: false,
            },
        );
        assert_eq!(again, "Nothing to do\n");
    }

    #[test]
    fn offline_upgrade_defaults_to_base() {
        let (_dir, m) = setup();
        revision(&m, "only");
        let sql = exec(
            &m,
            DbCommand::Upgrade {
                target: "head".into(),
                sql: true,
            },
        );
        assert!(sql.starts_with("BEGIN;"));
        assert_eq!(exec(&m, DbCommand::Current { verbose: false }), "<base>\n");
    }

    #[test]
    fn offline_downgrade_defaults_to_head() {
        let (_dir, m) = setup();
        revision(&m, "first");
        revision(&m, "second");
        let head = m.head().expect("should read head revision").expect("should have a head");

        let sql = exec(
            &m,
            DbCommand::Downgrade {
                target: "-1".into(),
                sql: true,
            },
        );
        assert!(sql.starts_with("BEGIN;"));
        assert!(sql.contains(&format!("-- Running downgrade {} -> ", head.id)));
        assert_eq!(sql.matches("-- Running downgrade").count(), 1);

        let all = exec(
            &m,
            DbCommand::Downgrade {
                target: "head:base".into(),
                sql: true,
            },
        );
        assert_eq!(all.matches("-- Running downgrade").count(), 2);
        assert_eq!(exec(&m, DbCommand::Current { verbose: false }), "<base>\n");
    }

    #[test]
    fn history_is_newest_first_and_paginates() {
        let (_dir, m) = setup();
        for n in 1..=5 {
            revision(&m, &format!("step {n}"));
        }

        let all = exec(
            &m,
            DbCommand::History {
                range: None,
                verbose: false,
                page: None,
                per_page: None,
            },
        );
        let lines: Vec<&str> = all.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("(head), step 5"));
        assert!(lines[4].starts_with("<base> -> "));

        let paged = exec(
            &m,
            DbCommand::History {
                range: None,
                verbose: false,
                page: Some("2".into()),
                per_page: Some(2),
            },
        );
        assert!(paged.contains("step 3"));
        assert!(paged.contains("step 2"));
        assert!(paged.contains("Showing 3-4 of 5 revisions. Pages: 1 [2] 3"));
    }

    #[test]
    fn stamp_and_head() {
        let (_dir, m) = setup();
        assert_eq!(exec(&m, DbCommand::Head { verbose: false }), "No revisions\n");
        revision(&m, "init");

        let stamped = exec(
            &m,
            DbCommand::Stamp {
                target: "head".into(),
                purge: false,
            },
        );
        let head = m.head().expect("should read head revision").expect("should have a head");
        assert_eq!(stamped, format!("Stamped {}\n", head.id));

        let verbose = exec(&m, DbCommand::Head { verbose: true });
        assert!(verbose.starts_with(&format!("Rev: {} (head)", head.id)));
    }
}
