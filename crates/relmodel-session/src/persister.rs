//! Graph persister: writes an in-memory entity graph in one transaction.
//!
//! Write order for a node:
//! 1. belongs-to parents (recursively), then their keys onto the node
//! 2. the node's own row
//! 3. the join row connecting it to its many-to-many owner, if any
//! 4. each owned relation in attachment order, each related instance in
//!    production order, depth-first
//!
//! Any failure rolls the whole session back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Entity, Error, Linkage, PivotTable, RelationDescriptor};

use crate::link::{self, LinkPhase};
use crate::lift;
use crate::session::{PersistenceSession, SessionConfig};

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Outcome<(), Error>> + 'a>>;

/// Persists entity graphs atomically.
#[derive(Debug, Clone, Default)]
pub struct GraphPersister {
    config: SessionConfig,
}

impl GraphPersister {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Persist `root` and everything attached to it.
    ///
    /// On success every instance of the graph is persisted and carries its
    /// key. On failure nothing the call wrote survives, and the graph is
    /// dropped.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, conn, root),
        fields(entity = %root.entity_type().name())
    )]
    pub async fn create<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        root: Entity,
    ) -> Outcome<Entity, Error> {
        let mut roots = try_outcome!(self.create_all(cx, conn, vec![root]).await);
        match roots.pop() {
            Some(root) => Outcome::Ok(root),
            None => Outcome::Err(Error::Custom(
                "graph persister returned no root".to_string(),
            )),
        }
    }

    /// Persist several graphs inside one session.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, roots), fields(graphs = roots.len()))]
    pub async fn create_all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        mut roots: Vec<Entity>,
    ) -> Outcome<Vec<Entity>, Error> {
        let mut session = try_outcome!(PersistenceSession::open(cx, conn, self.config.clone()).await);

        for root in &mut roots {
            let outcome = persist_node(&mut session, cx, root, None, None).await;
            if !matches!(outcome, Outcome::Ok(())) {
                return abort(session, cx, outcome).await;
            }
        }

        let stats = session.stats();
        try_outcome!(session.commit(cx).await);
        tracing::info!(
            graphs = roots.len(),
            rows = stats.rows_inserted,
            links = stats.links_inserted,
            "Persisted entity graph"
        );
        Outcome::Ok(roots)
    }
}

/// Roll back after `failure` and hand the failure back unchanged.
async fn abort<C: Connection, T>(
    session: PersistenceSession<'_, C>,
    cx: &Cx,
    failure: Outcome<(), Error>,
) -> Outcome<T, Error> {
    match &failure {
        Outcome::Err(e) => tracing::warn!(error = %e, "Entity graph failed"),
        Outcome::Cancelled(r) => tracing::warn!(reason = ?r, "Entity graph cancelled"),
        Outcome::Panicked(p) => tracing::warn!(panic = ?p, "Entity graph panicked"),
        Outcome::Ok(()) => {}
    }

    match session.rollback(cx).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => tracing::warn!(error = %e, "Rollback failed"),
        Outcome::Cancelled(r) => tracing::warn!(reason = ?r, "Rollback cancelled"),
        Outcome::Panicked(p) => tracing::warn!(panic = ?p, "Rollback panicked"),
    }

    match failure {
        Outcome::Ok(()) => Outcome::Err(Error::Custom(
            "entity graph aborted without a failure".to_string(),
        )),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

fn persist_node<'a, 'c, C: Connection + 'c>(
    session: &'a mut PersistenceSession<'c, C>,
    cx: &'a Cx,
    entity: &'a mut Entity,
    via: Option<&'a RelationDescriptor>,
    pivot_owner: Option<(&'a Entity, &'a PivotTable)>,
) -> NodeFuture<'a>
where
    'c: 'a,
{
    Box::pin(async move {
        let mut sets = entity.take_related();

        for set in sets
            .iter_mut()
            .filter(|s| LinkPhase::of(s.descriptor.kind()) == LinkPhase::BeforeOwner)
        {
            let descriptor = Arc::clone(&set.descriptor);
            let linkage = try_outcome!(lift(descriptor.linkage()));
            if set.members.len() > 1 {
                tracing::warn!(
                    relation = %descriptor.name(),
                    count = set.members.len(),
                    "Several parents attached to a belongs-to relation; the last one wins"
                );
            }
            for parent in &mut set.members {
                try_outcome!(persist_node(&mut *session, cx, parent, Some(&*descriptor), None).await);
                try_outcome!(lift(link::attach_parent(entity, parent, linkage)));
            }
        }

        if entity.is_persisted() {
            tracing::debug!(
                entity = %entity.entity_type().name(),
                "Instance already persisted, linking only"
            );
        } else {
            try_outcome!(session.insert_entity(cx, entity, via).await);
        }

        if let Some((owner, pivot)) = pivot_owner {
            try_outcome!(link::link_pivot(session, cx, owner, entity, pivot).await);
        }

        for set in &mut sets {
            let descriptor = Arc::clone(&set.descriptor);
            let phase = LinkPhase::of(descriptor.kind());
            if phase == LinkPhase::BeforeOwner {
                continue;
            }
            let linkage = try_outcome!(lift(descriptor.linkage()));
            tracing::trace!(
                relation = %descriptor.name(),
                count = set.members.len(),
                "Persisting related instances"
            );

            for related in &mut set.members {
                match phase {
                    LinkPhase::BeforeInsert => {
                        try_outcome!(lift(link::link_foreign_key(entity, related, linkage)));
                        try_outcome!(
                            persist_node(&mut *session, cx, related, Some(&*descriptor), None)
                                .await
                        );
                    }
                    LinkPhase::AfterInsert => {
                        let Linkage::Pivot(pivot) = linkage else {
                            return Outcome::Err(Error::Custom(format!(
                                "many-to-many relation '{}' has no pivot linkage",
                                descriptor.name()
                            )));
                        };
                        try_outcome!(
                            persist_node(
                                &mut *session,
                                cx,
                                related,
                                Some(&*descriptor),
                                Some((&*entity, pivot)),
                            )
                            .await
                        );
                    }
                    LinkPhase::BeforeOwner => {}
                }
            }
        }

        entity.restore_related(sets);
        Outcome::Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use relmodel_core::{ColumnDef, EntityType, RelationDescriptor, Value};

    struct Types {
        user: Arc<EntityType>,
        skill: Arc<EntityType>,
        post: Arc<EntityType>,
        comment: Arc<EntityType>,
    }

    fn types() -> Types {
        let skill = Arc::new(EntityType::new("Skill", "skills").column(ColumnDef::new("name")));
        let comment = Arc::new(
            EntityType::new("Comment", "comments")
                .column(ColumnDef::new("body"))
                .column(ColumnDef::new("post_id")),
        );
        let author = Arc::new(EntityType::new("User", "users").column(ColumnDef::new("name")));
        let comments = Arc::clone(&comment);
        let parent = Arc::clone(&author);
        let post = Arc::new(
            EntityType::new("Post", "posts")
                .column(ColumnDef::new("title"))
                .column(ColumnDef::new("user_id"))
                .relation(RelationDescriptor::has_many("comments", move || {
                    Ok(Arc::clone(&comments))
                }))
                .relation(RelationDescriptor::belongs_to("author", move || {
                    Ok(Arc::clone(&parent))
                })),
        );
        let skills = Arc::clone(&skill);
        let posts = Arc::clone(&post);
        let user = Arc::new(
            EntityType::new("User", "users")
                .column(ColumnDef::new("name"))
                .relation(
                    RelationDescriptor::many_to_many("skills", move || Ok(Arc::clone(&skills)))
                        .pivot_columns(["level"]),
                )
                .relation(RelationDescriptor::has_many("posts", move || {
                    Ok(Arc::clone(&posts))
                })),
        );
        Types {
            user,
            skill,
            post,
            comment,
        }
    }

    fn attach(owner: &mut Entity, relation: &str, members: Vec<Entity>) {
        let descriptor = owner.entity_type().describe_relation(relation).unwrap();
        owner.attach(descriptor, members);
    }

    #[test]
    fn many_to_many_inserts_join_rows_and_extras() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let t = types();

        let mut user = Entity::new(Arc::clone(&t.user));
        user.set("name", "ada");
        let mut first = Entity::new(Arc::clone(&t.skill));
        first.set("level", 3i64);
        let second = Entity::new(Arc::clone(&t.skill));
        attach(&mut user, "skills", vec![first, second]);

        let user = rt.block_on(async {
            unwrap_outcome(GraphPersister::default().create(&cx, &conn, user).await)
        });

        assert_eq!(
            conn.tables(),
            vec!["users", "skills", "skill_user", "skills", "skill_user"]
        );
        let state = conn.state();
        assert!(state.committed);
        assert!(!state.rolled_back);

        assert!(user.is_graph_persisted());
        let skills = user.related("skills").unwrap();
        assert_eq!(skills.len(), 2);
        for skill in skills {
            assert_eq!(skill.extras().len(), 2);
            assert_eq!(skill.extras().get("user_id"), user.primary_key());
            assert_eq!(skill.extras().get("skill_id"), skill.primary_key());
        }

        // the pivot column goes to the join row only
        assert!(!state.statements[1].0.contains("level"));
        assert!(state.statements[2].0.contains("\"level\""));
        assert!(state.statements[2].1.contains(&Value::BigInt(3)));
        assert!(!state.statements[4].0.contains("level"));
    }

    #[test]
    fn failure_rolls_back_and_returns_original_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::failing_on("\"skill_user\"");
        let t = types();

        let mut user = Entity::new(Arc::clone(&t.user));
        attach(&mut user, "skills", vec![Entity::new(Arc::clone(&t.skill))]);

        rt.block_on(async {
            match GraphPersister::default().create(&cx, &conn, user).await {
                Outcome::Err(e) => assert!(e.is_constraint_violation()),
                other => panic!("unexpected outcome: {other:?}"),
            }
        });

        let state = conn.state();
        assert!(state.rolled_back);
        assert!(!state.committed);
    }

    #[test]
    fn has_many_depth_first_with_foreign_keys() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let t = types();

        let mut user = Entity::new(Arc::clone(&t.user));
        let posts = (0..2)
            .map(|_| {
                let mut post = Entity::new(Arc::clone(&t.post));
                attach(&mut post, "comments", vec![Entity::new(Arc::clone(&t.comment))]);
                post
            })
            .collect();
        attach(&mut user, "posts", posts);

        let user = rt.block_on(async {
            unwrap_outcome(GraphPersister::default().create(&cx, &conn, user).await)
        });

        assert_eq!(
            conn.tables(),
            vec!["users", "posts", "comments", "posts", "comments"]
        );
        assert_eq!(user.graph_size(), 5);
        assert!(user.is_graph_persisted());
        for post in user.related("posts").unwrap() {
            assert_eq!(post.get("user_id"), user.primary_key());
            let comment = &post.related("comments").unwrap()[0];
            assert_eq!(comment.get("post_id"), post.primary_key());
        }
    }

    #[test]
    fn belongs_to_parent_is_inserted_first() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let t = types();

        let mut post = Entity::new(Arc::clone(&t.post));
        post.set("title", "hello");
        attach(&mut post, "author", vec![Entity::new(Arc::clone(&t.user))]);

        let post = rt.block_on(async {
            unwrap_outcome(GraphPersister::default().create(&cx, &conn, post).await)
        });

        assert_eq!(conn.tables(), vec!["users", "posts"]);
        let author = &post.related("author").unwrap()[0];
        assert_eq!(post.get("user_id"), author.primary_key());
        assert!(post.is_graph_persisted());
    }

    #[test]
    fn create_all_uses_one_session() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let t = types();

        let roots = vec![Entity::new(Arc::clone(&t.user)), Entity::new(Arc::clone(&t.user))];
        let persister = GraphPersister::new(
            SessionConfig::new().isolation(relmodel_core::IsolationLevel::Serializable),
        );
        let roots = rt.block_on(async {
            unwrap_outcome(persister.create_all(&cx, &conn, roots).await)
        });

        assert_eq!(roots.len(), 2);
        assert_ne!(roots[0].primary_key(), roots[1].primary_key());
        let state = conn.state();
        assert_eq!(state.begun, 1);
        assert_eq!(
            state.isolation,
            Some(relmodel_core::IsolationLevel::Serializable)
        );
        assert!(state.committed);
    }

    #[test]
    fn deep_failure_rolls_back_everything() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::failing_on("\"comments\"");
        let t = types();

        let mut user = Entity::new(Arc::clone(&t.user));
        let mut post = Entity::new(Arc::clone(&t.post));
        attach(&mut post, "comments", vec![Entity::new(Arc::clone(&t.comment))]);
        attach(&mut user, "posts", vec![post]);

        rt.block_on(async {
            assert!(matches!(
                GraphPersister::default().create(&cx, &conn, user).await,
                Outcome::Err(_)
            ));
        });

        assert_eq!(conn.tables(), vec!["users", "posts", "comments"]);
        assert!(conn.state().rolled_back);
    }
}
