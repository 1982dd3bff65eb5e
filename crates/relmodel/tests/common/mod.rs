//! Shared fixtures: a User/Skill/Post/Comment schema on in-memory SQLite.

#![allow(dead_code)]

use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use relmodel::prelude::*;
use relmodel_sqlite::SqliteConnection;

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

const SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE skills (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE skill_user (
        user_id INTEGER NOT NULL REFERENCES users(id),
        skill_id INTEGER NOT NULL REFERENCES skills(id),
        level INTEGER
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        user_id INTEGER REFERENCES users(id)
    );
    CREATE TABLE comments (
        id INTEGER PRIMARY KEY,
        body TEXT,
        post_id INTEGER NOT NULL REFERENCES posts(id)
    );
";

pub fn open_db() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

pub fn count(conn: &SqliteConnection, table: &str) -> i64 {
    let cx = Cx::for_testing();
    let sql = format!("SELECT COUNT(*) AS n FROM {table}");
    let row = block_on(async { unwrap_outcome(conn.query_one(&cx, &sql, &[]).await) })
        .expect("count row");
    row.get_named::<i64>("n").expect("count value")
}

pub struct Types {
    pub user: Arc<EntityType>,
    pub skill: Arc<EntityType>,
    pub post: Arc<EntityType>,
    pub comment: Arc<EntityType>,
}

pub fn register(registry: &Arc<EntityRegistry>) -> Types {
    let skills = registry.resolver("Skill");
    let posts = registry.resolver("Post");
    let comments = registry.resolver("Comment");
    let authors = registry.resolver("User");

    let user = registry
        .register(
            EntityType::new("User", "users")
                .column(ColumnDef::new("name"))
                .relation(
                    RelationDescriptor::many_to_many("skills", move || skills())
                        .pivot_columns(["level"]),
                )
                .relation(RelationDescriptor::has_many("posts", move || posts())),
        )
        .expect("register User");
    let skill = registry
        .register(EntityType::new("Skill", "skills").column(ColumnDef::new("name").not_null()))
        .expect("register Skill");
    let post = registry
        .register(
            EntityType::new("Post", "posts")
                .column(ColumnDef::new("title").not_null())
                .column(ColumnDef::new("user_id"))
                .relation(RelationDescriptor::has_many("comments", move || comments()))
                .relation(RelationDescriptor::belongs_to("author", move || authors())),
        )
        .expect("register Post");
    let comment = registry
        .register(
            EntityType::new("Comment", "comments")
                .column(ColumnDef::new("body"))
                .column(ColumnDef::new("post_id")),
        )
        .expect("register Comment");

    Types {
        user,
        skill,
        post,
        comment,
    }
}

/// Factories with every relation wired up. Skills get no name by default,
/// so a customizer must supply one for inserts to succeed.
pub struct Factories {
    pub users: FactoryBuilder,
    pub skills: FactoryBuilder,
    pub posts: FactoryBuilder,
    pub comments: FactoryBuilder,
}

fn plain(entity_type: &Arc<EntityType>) -> EntityFactory {
    let ty = Arc::clone(entity_type);
    EntityFactory::new(Arc::clone(entity_type), move |_, _| {
        Ok(Entity::new(Arc::clone(&ty)))
    })
}

pub fn factories(types: &Types) -> Factories {
    let skills = plain(&types.skill).build();
    let comments = plain(&types.comment)
        .state("long", |c| c.set("body", "x".repeat(200)))
        .build();
    let authors_ty = Arc::clone(&types.user);
    let author = plain(&authors_ty)
        .state("named", |u| u.set("name", "author"))
        .build();

    let post_comments = comments.clone();
    let posts = plain(&types.post)
        .state("titled", |p| p.set("title", "Hello"))
        .related("comments", move || post_comments.clone())
        .expect("posts.comments")
        .related("author", move || author.clone())
        .expect("posts.author")
        .build()
        .apply("titled")
        .expect("titled state");

    let user_skills = skills.clone();
    let user_posts = posts.clone();
    let users = plain(&types.user)
        .related("skills", move || user_skills.clone())
        .expect("users.skills")
        .related("posts", move || user_posts.clone())
        .expect("users.posts")
        .build()
        .merge(attrs! { "name" => "ada" });

    Factories {
        users,
        skills,
        posts,
        comments,
    }
}
