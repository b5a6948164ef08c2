//! Unit of work spanning one or more named connections.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::connection::Connections;
use crate::query::{Delete, Insert, Query, QueryExecutor, TransactionExecutor, Update};
use crate::record::Row;
use crate::OrmError;

/// Routes statements to their connection, inside a transaction per
/// connection begun on first use, or straight to the pool in autocommit mode.
///
/// Committing several connections is not atomic across them.
pub struct Session<'c, E: QueryExecutor> {
    connections: &'c Connections<E>,
    transactions: HashMap<String, E::Transaction>,
    autocommit: bool,
}

impl<'c, E: QueryExecutor> Session<'c, E> {
    pub fn new(connections: &'c Connections<E>, autocommit: bool) -> Self {
        Self {
            connections,
            transactions: HashMap::new(),
            autocommit,
        }
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    async fn transaction(&mut self, connection: &str) -> Result<&mut E::Transaction, OrmError> {
        if !self.transactions.contains_key(connection) {
            let tx = self.connections.get(connection)?.begin_transaction().await?;
            tracing::debug!(connection, "transaction started");
            self.transactions.insert(connection.to_string(), tx);
        }
        self.transactions
            .get_mut(connection)
            .ok_or_else(|| OrmError::UnknownConnection(connection.to_string()))
    }

    pub async fn fetch(&mut self, connection: &str, query: &Query) -> Result<Vec<Row>, OrmError> {
        tracing::debug!(connection, table = %query.table, "select");
        if self.autocommit {
            return self.connections.get(connection)?.fetch(query).await;
        }
        self.transaction(connection).await?.fetch(query).await
    }

    pub async fn exists(&mut self, connection: &str, query: &Query) -> Result<bool, OrmError> {
        tracing::debug!(connection, table = %query.table, "select exists");
        if self.autocommit {
            return self.connections.get(connection)?.exists(query).await;
        }
        self.transaction(connection).await?.exists(query).await
    }

    pub async fn insert(
        &mut self,
        connection: &str,
        insert: &Insert,
    ) -> Result<Option<JsonValue>, OrmError> {
        tracing::debug!(connection, table = %insert.table, "insert");
        if self.autocommit {
            return self.connections.get(connection)?.insert(insert).await;
        }
        self.transaction(connection).await?.insert(insert).await
    }

    pub async fn update(&mut self, connection: &str, update: &Update) -> Result<u64, OrmError> {
        tracing::debug!(connection, table = %update.table, "update");
        if self.autocommit {
            return self.connections.get(connection)?.update(update).await;
        }
        self.transaction(connection).await?.update(update).await
    }

    pub async fn delete(&mut self, connection: &str, delete: &Delete) -> Result<u64, OrmError> {
        tracing::debug!(connection, table = %delete.table, "delete");
        if self.autocommit {
            return self.connections.get(connection)?.delete(delete).await;
        }
        self.transaction(connection).await?.delete(delete).await
    }

    /// Commit every open transaction. After the first failure the remaining
    /// transactions are rolled back.
    pub async fn commit(self) -> Result<(), OrmError> {
        let mut failure = None;
        for (connection, tx) in self.transactions {
            if failure.is_some() {
                match tx.rollback().await {
                    Ok(()) => tracing::info!(connection = %connection, "transaction rolled back"),
                    Err(e) => tracing::warn!(
                        connection = %connection,
                        error = %e,
                        "rollback after failed commit did not complete"
                    ),
                }
                continue;
            }
            match tx.commit().await {
                Ok(()) => tracing::info!(connection = %connection, "transaction committed"),
                Err(e) => {
                    tracing::warn!(connection = %connection, error = %e, "commit failed");
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn rollback(self) -> Result<(), OrmError> {
        let mut result = Ok(());
        for (connection, tx) in self.transactions {
            match tx.rollback().await {
                Ok(()) => tracing::info!(connection = %connection, "transaction rolled back"),
                Err(e) => {
                    tracing::warn!(connection = %connection, error = %e, "rollback failed");
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;

    fn connections() -> (Connections<RecordingExecutor>, RecordingExecutor, RecordingExecutor) {
        let main = RecordingExecutor::new();
        let audit = RecordingExecutor::new();
        let connections = Connections::new("main")
            .with("main", main.clone())
            .with("audit", audit.clone());
        (connections, main, audit)
    }

    async fn touch_both(session: &mut Session<'_, RecordingExecutor>) {
        let query = Query::for_table("posts");
        session.fetch("main", &query).await.unwrap();
        session.fetch("audit", &query).await.unwrap();
    }

    #[tokio::test]
    async fn commit_reports_commit_error_when_rollback_also_fails() {
        let (connections, main, audit) = connections();
        for executor in [&main, &audit] {
            executor.fail_commits();
            executor.fail_rollbacks();
        }
        let mut session = Session::new(&connections, false);
        touch_both(&mut session).await;

        let err = session.commit().await.unwrap_err();
        assert!(matches!(&err, OrmError::Persistence(msg) if msg == "commit refused"));

        // One transaction failed to commit, the other was still asked to roll back.
        let mut ends: Vec<String> = main
            .log()
            .into_iter()
            .chain(audit.log())
            .filter(|l| l != "begin" && !l.starts_with("select"))
            .collect();
        ends.sort();
        assert_eq!(ends, ["commit", "rollback"]);
    }

    #[tokio::test]
    async fn rollback_attempts_every_connection() {
        let (connections, main, audit) = connections();
        main.fail_rollbacks();
        let mut session = Session::new(&connections, false);
        touch_both(&mut session).await;

        let err = session.rollback().await.unwrap_err();
        assert!(matches!(err, OrmError::Persistence(msg) if msg == "rollback refused"));
        assert!(main.log().contains(&"rollback".to_string()));
        assert!(audit.log().contains(&"rollback".to_string()));
    }
}
