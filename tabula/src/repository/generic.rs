//! The generic repository

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::entity::{decode, encode, Entity, Record};
use crate::executor::ExecutorError;
use crate::hooks::{Clock, OperationKind, PersistHook, SystemClock, TimestampHook};
use crate::predicate::{IntoPredicate, Predicate};
use crate::session::Session;

use super::{RepositoryError, RepositoryOperation, RepositoryResult};

/// Typed CRUD over one entity type.
///
/// Holds nothing but the session, the persist hook and a clock, so it is cheap
/// to clone and safe to share between tasks.
pub struct Repository<E: Entity> {
    session: Session,
    hook: Arc<dyn PersistHook>,
    clock: Arc<dyn Clock>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            hook: Arc::clone(&self.hook),
            clock: Arc::clone(&self.clock),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &E::entity_name())
            .field("table", &E::TABLE.name)
            .field("session", &self.session)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    /// A repository stamping audit fields with [`TimestampHook`] and the system clock
    pub fn new(session: Session) -> Self {
        Self::with_hook(session, TimestampHook)
    }

    /// A repository with a custom persist hook
    pub fn with_hook(session: Session, hook: impl PersistHook + 'static) -> Self {
        Self {
            session,
            hook: Arc::new(hook),
            clock: Arc::new(SystemClock),
            _entity: PhantomData,
        }
    }

    /// Replace the clock the hook is fed from
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The session this repository runs on
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn executor_error(
        &self,
        operation: RepositoryOperation,
        err: ExecutorError,
        predicate: Option<&Predicate>,
    ) -> RepositoryError {
        let error = RepositoryError::from_executor(operation, err).with_entity_type(E::entity_name());
        match predicate {
            Some(predicate) => error.with_predicate(predicate),
            None => error,
        }
    }

    fn predicate(
        &self,
        operation: RepositoryOperation,
        predicate: impl IntoPredicate,
    ) -> RepositoryResult<Predicate> {
        predicate.into_predicate().map_err(|e| {
            RepositoryError::malformed_predicate(operation, e).with_entity_type(E::entity_name())
        })
    }

    fn encode(&self, operation: RepositoryOperation, item: &E) -> RepositoryResult<Record> {
        encode(item).map_err(|e| {
            RepositoryError::serialization(operation, e.to_string())
                .with_entity_type(E::entity_name())
        })
    }

    fn decode(&self, operation: RepositoryOperation, record: Record) -> RepositoryResult<E> {
        decode(record).map_err(|e| {
            RepositoryError::serialization(operation, e.to_string())
                .with_entity_type(E::entity_name())
        })
    }

    /// Insert one entity.
    ///
    /// `created_at` is stamped right before the insert is sent. Constraint
    /// and backend failures are returned unchanged; nothing is retried.
    pub async fn create(&self, ctx: &Context, item: &mut E) -> RepositoryResult<()> {
        let op = RepositoryOperation::Create;
        let now = self.clock.now();
        self.hook
            .before_persist(OperationKind::Insert, item.timestamps_mut(), now);

        let record = self.encode(op, item)?;
        self.session
            .insert(ctx, &E::TABLE, &record)
            .await
            .map_err(|e| self.executor_error(op, e, None))?;

        tracing::debug!(entity = E::entity_name(), table = E::TABLE.name, "entity created");
        Ok(())
    }

    /// Every stored entity, in backend order. Empty when the table is empty.
    pub async fn find_all(&self, ctx: &Context) -> RepositoryResult<Vec<E>> {
        let op = RepositoryOperation::FindAll;
        let rows = self
            .session
            .select_all(ctx, &E::TABLE)
            .await
            .map_err(|e| self.executor_error(op, e, None))?;

        rows.into_iter().map(|row| self.decode(op, row)).collect()
    }

    /// The first entity matching `predicate`.
    ///
    /// When several rows match, the first one in backend order wins; both
    /// bundled backends return rows in insertion order.
    pub async fn find_one_by(
        &self,
        ctx: &Context,
        predicate: impl IntoPredicate,
    ) -> RepositoryResult<E> {
        let op = RepositoryOperation::FindOneBy;
        let predicate = self.predicate(op, predicate)?;

        // A second row is fetched only to notice ambiguous matches
        let rows = self
            .session
            .select_limit(ctx, &E::TABLE, &predicate, 2)
            .await
            .map_err(|e| self.executor_error(op, e, Some(&predicate)))?;

        if rows.len() > 1 {
            tracing::debug!(
                entity = E::entity_name(),
                %predicate,
                "several rows matched, using the first"
            );
        }

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found(op, E::entity_name(), &predicate))?;

        self.decode(op, row)
    }

    /// Write `item` over every row matching `predicate`.
    ///
    /// `updated_at` is stamped first. Key and `created_at` columns are never
    /// written. Zero matching rows is not an error; the affected count is
    /// only logged.
    pub async fn update_where(
        &self,
        ctx: &Context,
        predicate: impl IntoPredicate,
        item: &mut E,
    ) -> RepositoryResult<()> {
        let op = RepositoryOperation::UpdateWhere;
        let predicate = self.predicate(op, predicate)?;

        let now = self.clock.now();
        self.hook
            .before_persist(OperationKind::Update, item.timestamps_mut(), now);

        let mut record = self.encode(op, item)?;
        record.retain(|field, _| {
            E::TABLE
                .column_for_field(field)
                .map_or(true, |column| column.is_written_on_update())
        });

        let affected = self
            .session
            .update_where(ctx, &E::TABLE, &record, &predicate)
            .await
            .map_err(|e| self.executor_error(op, e, Some(&predicate)))?;

        tracing::debug!(entity = E::entity_name(), %predicate, affected, "entities updated");
        Ok(())
    }

    /// Delete every row matching `predicate`. Zero matching rows is not an error.
    pub async fn delete_where(
        &self,
        ctx: &Context,
        predicate: impl IntoPredicate,
    ) -> RepositoryResult<()> {
        let op = RepositoryOperation::DeleteWhere;
        let predicate = self.predicate(op, predicate)?;

        let affected = self
            .session
            .delete_where(ctx, &E::TABLE, &predicate)
            .await
            .map_err(|e| self.executor_error(op, e, Some(&predicate)))?;

        tracing::debug!(entity = E::entity_name(), %predicate, affected, "entities deleted");
        Ok(())
    }
}
