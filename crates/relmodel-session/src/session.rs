//! Persistence session: one transaction for one graph write.

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Attributes, Connection, Entity, Error, IsolationLevel, RelationDescriptor, Row,
    TransactionOps, Value, quote_ident,
};

/// Configuration for a persistence session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Isolation level the transaction begins with.
    pub isolation: IsolationLevel,
    /// Log every statement with its bound parameters at debug level.
    pub trace_statements: bool,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn trace_statements(mut self, enabled: bool) -> Self {
        self.trace_statements = enabled;
        self
    }
}

/// Counters for statements a session issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Entity rows inserted.
    pub rows_inserted: usize,
    /// Join table rows inserted.
    pub links_inserted: usize,
}

/// Transactional scope for one `create` call.
///
/// Owns its transaction exclusively. Finish it with [`commit`](Self::commit)
/// or [`rollback`](Self::rollback); dropping it unfinished leaves rollback to
/// the driver's transaction.
pub struct PersistenceSession<'c, C: Connection + 'c> {
    tx: C::Tx<'c>,
    config: SessionConfig,
    stats: SessionStats,
}

impl<'c, C: Connection + 'c> PersistenceSession<'c, C> {
    /// Begin a transaction on `conn`.
    #[tracing::instrument(level = "debug", skip(cx, conn))]
    pub async fn open(cx: &Cx, conn: &'c C, config: SessionConfig) -> Outcome<Self, Error> {
        let tx = match conn.begin_with(cx, config.isolation).await {
            Outcome::Ok(tx) => tx,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(isolation = config.isolation.as_sql(), "Opened persistence session");
        Outcome::Ok(Self {
            tx,
            config,
            stats: SessionStats::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Insert `entity` into its table and record the generated key.
    ///
    /// Only columns of the entity's own table are written. Foreign attributes
    /// are skipped; `via` is the relation the entity is being linked through,
    /// whose pivot columns are expected to be foreign and are skipped silently.
    ///
    /// A key set before the insert is kept as is. Otherwise the driver's
    /// generated row id is recorded as a `BigInt`, so types whose primary key
    /// is not an integer must assign their key up front.
    pub async fn insert_entity(
        &mut self,
        cx: &Cx,
        entity: &mut Entity,
        via: Option<&RelationDescriptor>,
    ) -> Outcome<(), Error> {
        let entity_type = std::sync::Arc::clone(entity.entity_type());
        for (name, _) in entity.foreign_attributes() {
            if !via.is_some_and(|rel| rel.is_pivot_column(name)) {
                tracing::warn!(
                    entity = %entity_type.name(),
                    attribute = %name,
                    "Skipping attribute that is not a column of the entity's table"
                );
            }
        }

        let columns: Vec<(String, Value)> = entity
            .native_attributes()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let generated = match self.insert_row(cx, entity_type.table(), &columns).await {
            Outcome::Ok(id) => id,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let key = entity
            .primary_key()
            .cloned()
            .unwrap_or(Value::BigInt(generated));
        entity.record_insert(key);
        self.stats.rows_inserted += 1;
        Outcome::Ok(())
    }

    /// Insert a join table row.
    pub async fn insert_link(
        &mut self,
        cx: &Cx,
        table: &str,
        values: &Attributes,
    ) -> Outcome<(), Error> {
        let columns: Vec<(String, Value)> = values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        match self.insert_row(cx, table, &columns).await {
            Outcome::Ok(_) => {
                self.stats.links_inserted += 1;
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert one row and return the generated row id.
    pub async fn insert_row(
        &mut self,
        cx: &Cx,
        table: &str,
        columns: &[(String, Value)],
    ) -> Outcome<i64, Error> {
        let sql = insert_sql(table, columns);
        let params: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
        if self.config.trace_statements {
            tracing::debug!(sql = %sql, params = ?params, "Executing INSERT");
        } else {
            tracing::trace!(sql = %sql, "Executing INSERT");
        }
        self.tx.insert(cx, &sql, &params).await
    }

    /// Run a query inside the session's transaction.
    pub async fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        if self.config.trace_statements {
            tracing::debug!(sql = %sql, params = ?params, "Executing query");
        }
        self.tx.query(cx, sql, params).await
    }

    /// Commit the transaction.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(self, cx: &Cx) -> Outcome<(), Error> {
        let stats = self.stats;
        match self.tx.commit(cx).await {
            Outcome::Ok(()) => {
                tracing::debug!(
                    rows = stats.rows_inserted,
                    links = stats.links_inserted,
                    "Committed persistence session"
                );
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Roll back the transaction, discarding every row this session wrote.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(self, cx: &Cx) -> Outcome<(), Error> {
        let stats = self.stats;
        tracing::warn!(
            rows = stats.rows_inserted,
            links = stats.links_inserted,
            "Rolling back persistence session"
        );
        self.tx.rollback(cx).await
    }
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2)`, or `DEFAULT VALUES` when
/// there is nothing to write.
fn insert_sql(table: &str, columns: &[(String, Value)]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let col_list = columns
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        col_list,
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use relmodel_core::{ColumnDef, EntityType};
    use std::sync::Arc;

    fn user_type() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("User", "users")
                .column(ColumnDef::new("name"))
                .column(ColumnDef::new("points").default_value(0i64)),
        )
    }

    #[test]
    fn insert_sql_shapes() {
        assert_eq!(
            insert_sql("users", &[]),
            "INSERT INTO \"users\" DEFAULT VALUES"
        );
        assert_eq!(
            insert_sql(
                "skill_user",
                &[
                    ("skill_id".to_string(), Value::BigInt(1)),
                    ("user_id".to_string(), Value::BigInt(2)),
                ]
            ),
            "INSERT INTO \"skill_user\" (\"skill_id\", \"user_id\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn insert_entity_writes_native_columns_and_records_key() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();

        rt.block_on(async {
            let mut session =
                unwrap_outcome(PersistenceSession::open(&cx, &conn, SessionConfig::new()).await);
            let mut user = Entity::new(user_type());
            user.set("name", "ada");
            user.set("nickname", "countess");

            unwrap_outcome(session.insert_entity(&cx, &mut user, None).await);
            assert!(user.is_persisted());
            assert_eq!(user.primary_key(), Some(&Value::BigInt(1)));
            assert_eq!(session.stats().rows_inserted, 1);
            unwrap_outcome(session.commit(&cx).await);
        });

        let state = conn.state();
        assert_eq!(state.begun, 1);
        assert!(state.committed);
        assert_eq!(
            state.statements[0].0,
            "INSERT INTO \"users\" (\"name\", \"points\") VALUES ($1, $2)"
        );
        assert_eq!(
            state.statements[0].1,
            vec![Value::Text("ada".into()), Value::BigInt(0)]
        );
    }

    #[test]
    fn preassigned_key_is_kept() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();

        rt.block_on(async {
            let mut session =
                unwrap_outcome(PersistenceSession::open(&cx, &conn, SessionConfig::new()).await);
            let mut user = Entity::new(user_type());
            user.set("id", 42i64);
            unwrap_outcome(session.insert_entity(&cx, &mut user, None).await);
            assert_eq!(user.primary_key(), Some(&Value::BigInt(42)));
            unwrap_outcome(session.rollback(&cx).await);
        });

        let state = conn.state();
        assert!(state.rolled_back);
        assert!(!state.committed);
    }

    #[test]
    fn text_key_is_not_replaced_by_row_id() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let tag_type = Arc::new(EntityType::new("Tag", "tags").primary_key("slug"));

        rt.block_on(async {
            let mut session =
                unwrap_outcome(PersistenceSession::open(&cx, &conn, SessionConfig::new()).await);
            let mut tag = Entity::new(Arc::clone(&tag_type));
            tag.set("slug", "rust");
            unwrap_outcome(session.insert_entity(&cx, &mut tag, None).await);
            assert_eq!(tag.primary_key(), Some(&Value::from("rust")));

            let mut generated = Entity::new(tag_type);
            unwrap_outcome(session.insert_entity(&cx, &mut generated, None).await);
            assert_eq!(generated.primary_key(), Some(&Value::BigInt(2)));
            unwrap_outcome(session.commit(&cx).await);
        });
    }

    #[test]
    fn failed_insert_leaves_entity_unpersisted() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::failing_on("\"users\"");

        rt.block_on(async {
            let mut session =
                unwrap_outcome(PersistenceSession::open(&cx, &conn, SessionConfig::new()).await);
            let mut user = Entity::new(user_type());
            match session.insert_entity(&cx, &mut user, None).await {
                Outcome::Err(e) => assert!(e.is_constraint_violation()),
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(!user.is_persisted());
            assert_eq!(session.stats().rows_inserted, 0);
        });
    }

    #[test]
    fn config_builder() {
        let config = SessionConfig::new()
            .isolation(IsolationLevel::Serializable)
            .trace_statements(true);
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert!(config.trace_statements);
        assert!(!SessionConfig::default().trace_statements);
    }
}
