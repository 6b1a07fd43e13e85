use std::sync::Barrier;

use rusqlite::Row;
use sqlwrap_db::{Column, Database, DbError, Model, ModelDecl, Value};
use sqlwrap_types::ColumnType;

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: i64,
    email: String,
    name: Option<String>,
}

impl Model for User {
    fn declaration() -> ModelDecl {
        ModelDecl::new("User")
            .column(Column::id("id"))
            .column(Column::new("email", ColumnType::Text).not_null().unique())
            .column(Column::new("name", ColumnType::Text))
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
        })
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn setup() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let url = format!("sqlite:///{}", dir.path().join("app.db").display());
    let db = Database::connect(&url).expect("should open database");
    let model = db.register::<User>().expect("should register model");
    assert_eq!(model.table(), Some("users"));
    db.create_all().expect("should create tables");
    (dir, db)
}

#[test]
fn created_rows_are_visible_after_commit() {
    let (_dir, db) = setup();

    let session = db.new_session().expect("should open session");
    let user: User = session
        .create(&[("email", text("ada@example.com")), ("name", text("Ada"))])
        .expect("should insert row");
    assert_eq!(user.id, 1);
    assert_eq!(user.name.as_deref(), Some("Ada"));
    session.commit().expect("should commit");
    drop(session);

    let other = db.new_session().expect("should open session");
    let found: Vec<User> = other.all(&[("email", text("ada@example.com"))]).expect("should query rows");
    assert_eq!(found, vec![user]);
}

#[test]
fn dropped_session_discards_pending_work() {
    let (_dir, db) = setup();
    {
        let session = db.new_session().expect("should open session");
        session
            .create::<User>(&[("email", text("tmp@example.com"))])
            .expect("should insert row");
    }
    let session = db.new_session().expect("should open session");
    assert!(session.all::<User>(&[]).expect("should query rows").is_empty());
}

#[test]
fn finders() {
    let (_dir, db) = setup();
    let session = db.new_session().expect("should open session");
    for email in ["a@x.io", "b@x.io", "c@x.io"] {
        session.create::<User>(&[("email", text(email))]).expect("should insert row");
    }

    let first: Option<User> = session.first(&[]).expect("should query first row");
    assert_eq!(first.expect("should succeed").email, "a@x.io");

    let by_key: Option<User> = session.get(2_i64).expect("should check out connection");
    assert_eq!(by_key.expect("should succeed").email, "b@x.io");
    assert!(session.get::<User>(99_i64).expect("should check out connection").is_none());

    let unnamed: Vec<User> = session.all(&[("name", Value::Null)]).expect("should query rows");
    assert_eq!(unnamed.len(), 3);

    let err = session.all::<User>(&[("nickname", text("x"))]).unwrap_err();
    assert!(matches!(err, DbError::UnknownColumn { column, .. } if column == "nickname"));
}

#[test]
fn first_or_create_does_not_duplicate() {
    let (_dir, db) = setup();
    let session = db.new_session().expect("should open session");

    let created: User = session
        .first_or_create(&[("email", text("dup@x.io"))])
        .expect("should find or insert");
    let again: User = session
        .first_or_create(&[("email", text("dup@x.io"))])
        .expect("should find or insert");
    assert_eq!(created, again);
    assert_eq!(session.all::<User>(&[]).expect("should query rows").len(), 1);
}

#[test]
fn create_or_first_falls_back_on_unique_violation() {
    let (_dir, db) = setup();
    let session = db.new_session().expect("should open session");
    let existing: User = session
        .create(&[("email", text("taken@x.io")), ("name", text("Original"))])
        .expect("should insert row");
    session
        .create::<User>(&[("email", text("pending@x.io"))])
        .expect("should insert row");

    let found: User = session
        .create_or_first(&[("email", text("taken@x.io"))])
        .expect("should insert or find");
    assert_eq!(found, existing);

    // The conflicting attributes match no row, so the violation surfaces.
    let err = session
        .create_or_first::<User>(&[("email", text("taken@x.io")), ("name", text("Other"))])
        .unwrap_err();
    assert!(err.is_constraint_violation());

    // Earlier work in the same transaction survives the failed insert.
    assert_eq!(session.all::<User>(&[]).expect("should query rows").len(), 2);
}

#[test]
fn update_and_delete() {
    let (_dir, db) = setup();
    let session = db.new_session().expect("should open session");
    for email in ["a@x.io", "b@x.io", "c@x.io"] {
        session.create::<User>(&[("email", text(email))]).expect("should insert row");
    }

    let changed = session
        .update::<User>(&[("email", text("b@x.io"))], &[("name", text("Bee"))])
        .expect("should update rows");
    assert_eq!(changed, 1);
    let bee: User = session.get(2_i64).expect("should check out connection").expect("should find row");
    assert_eq!(bee.name.as_deref(), Some("Bee"));

    let renamed = session
        .update::<User>(&[], &[("name", text("Everyone"))])
        .expect("should update rows");
    assert_eq!(renamed, 3);

    let deleted = session.delete::<User>(&[("email", text("a@x.io"))]).expect("should delete rows");
    assert_eq!(deleted, 1);
    assert_eq!(session.all::<User>(&[]).expect("should query rows").len(), 2);

    let err = session
        .update::<User>(&[], &[("missing", text("x"))])
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownColumn { .. }));
}

#[test]
fn paginates_query_results() {
    let (_dir, db) = setup();
    let session = db.new_session().expect("should open session");
    for n in 1..=45 {
        session
            .create::<User>(&[("email", text(&format!("user{n}@x.io")))])
            .expect("should insert row");
    }

    let page = session.paginate::<User>(&[], 2_u64, 20).expect("should paginate");
    assert_eq!(page.total(), 45);
    assert_eq!(page.num_pages(), 3);
    assert_eq!(page.get_range(" - "), "21 - 40");
    let ids: Vec<i64> = page.items().expect("should load items").into_iter().map(|u| u.id).collect();
    assert_eq!(ids, (21..=40).collect::<Vec<_>>());

    let last = session.paginate::<User>(&[], "last", 20).expect("should paginate");
    assert_eq!(last.page(), 3);
    assert_eq!(last.items().expect("should load items").len(), 5);
    assert!(!last.has_next());

    let next = page.next().expect("should yield next");
    assert_eq!(next.page(), 3);
}

#[test]
fn scoped_session_keeps_pending_work_between_calls() {
    let (_dir, db) = setup();
    let scoped = db.session();

    scoped
        .create::<User>(&[("email", text("scoped@x.io"))])
        .expect("should insert row");
    let seen: Option<User> = scoped
        .first(&[("email", text("scoped@x.io"))])
        .expect("should query first row");
    assert!(seen.is_some());
    scoped.commit().expect("should commit");
    scoped.remove();
    assert_eq!(scoped.active(), 0);

    let session = db.new_session().expect("should open session");
    assert_eq!(session.all::<User>(&[]).expect("should query rows").len(), 1);
}

#[test]
fn nested_scoped_calls_share_the_thread_session() {
    let (_dir, db) = setup();
    let scoped = db.session();

    let inner: Option<User> = scoped
        .with(|s| {
            s.create::<User>(&[("email", text("outer@x.io"))])?;
            scoped.first(&[("email", text("outer@x.io"))])
        })
        .expect("should run in scoped session");
    assert_eq!(inner.map(|u| u.email).as_deref(), Some("outer@x.io"));
    assert_eq!(scoped.active(), 1);

    scoped
        .with(|s| {
            s.create::<User>(&[("email", text("nested@x.io"))])?;
            scoped.commit()
        })
        .expect("should run in scoped session");
    scoped.remove();

    let session = db.new_session().expect("should open session");
    assert_eq!(session.all::<User>(&[]).expect("should query rows").len(), 2);
}

#[test]
fn scoped_sessions_are_isolated_per_thread() {
    let (_dir, db) = setup();
    let scoped = db.session();
    let barrier = Barrier::new(2);

    std::thread::scope(|threads| {
        threads.spawn(|| {
            scoped
                .create::<User>(&[("email", text("alice@x.io"))])
                .expect("should insert row");
            barrier.wait();
            barrier.wait();

            let own: Option<User> = scoped
                .first(&[("email", text("alice@x.io"))])
                .expect("should query first row");
            assert!(own.is_some());
            assert_eq!(scoped.active(), 2);
            scoped.remove();
            barrier.wait();
        });

        threads.spawn(|| {
            barrier.wait();
            let other: Option<User> = scoped
                .first(&[("email", text("alice@x.io"))])
                .expect("should query first row");
            assert!(other.is_none());
            assert_eq!(scoped.active(), 2);
            barrier.wait();
            barrier.wait();

            assert_eq!(scoped.active(), 1);
            scoped
                .create::<User>(&[("email", text("bob@x.io"))])
                .expect("should insert row");
            let own: Vec<User> = scoped.all(&[]).expect("should query rows");
            assert_eq!(own.len(), 1);
            assert_eq!(own[0].email, "bob@x.io");
            scoped.commit().expect("should commit");
            scoped.remove();
        });
    });

    assert_eq!(scoped.active(), 0);
    let session = db.new_session().expect("should open session");
    let users = session.all::<User>(&[]).expect("should query rows");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].email, "bob@x.io");
}

#[test]
fn test_transaction_leaves_no_trace() {
    let (_dir, db) = setup();
    {
        let tt = db.test_transaction(true).expect("should open test transaction");
        let session = tt.session();
        session
            .create::<User>(&[("email", text("kept@x.io"))])
            .expect("should insert row");
        session.commit().expect("should commit");
        session
            .create::<User>(&[("email", text("dropped@x.io"))])
            .expect("should insert row");
        session.rollback().expect("should roll back");

        let emails: Vec<String> = session
            .all::<User>(&[])
            .expect("should query rows")
            .into_iter()
            .map(|u| u.email)
            .collect();
        assert_eq!(emails, vec!["kept@x.io"]);
        tt.close().expect("should close transaction");
    }

    let session = db.new_session().expect("should open session");
    assert!(session.all::<User>(&[]).expect("should query rows").is_empty());
}
