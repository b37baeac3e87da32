//! Generic repository over a SeaORM entity.
//!
//! Every operation runs on the ambient session. Transactional operations
//! open their own scope when called outside one, and join the caller's
//! scope when called from another repository operation.

use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DbErr, EntityTrait, IdenStatic,
    IntoActiveModel, Iterable, ModelTrait, PaginatorTrait, PrimaryKeyToColumn, PrimaryKeyTrait,
    QueryOrder, QuerySelect,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::errors::{DataError, DataResult};
use crate::session::{ambient, Session};
use crate::transaction::{intercept, Operation};
use crate::types::{PageRequest, Paginated};

use super::registry::RepositoryRegistry;

const CREATE: Operation = Operation::transactional("create");
const BULK_CREATE: Operation = Operation::transactional("bulk_create");
const UPDATE: Operation = Operation::transactional("update");
const UPSERT: Operation = Operation::transactional("upsert");
const FIND_BY_ID: Operation = Operation::transactional("find_by_id");
const FIND_ALL: Operation = Operation::transactional("find_all");
const FIND_PAGE: Operation = Operation::transactional("find_page");
const FIND_PAGINATED: Operation = Operation::transactional("find_paginated");
const GET_COUNT: Operation = Operation::transactional("get_count");
const DELETE: Operation = Operation::transactional("delete");
const EXPUNGE_ALL: Operation = Operation::plain("expunge_all");

/// Primary key value type of entity `E`
pub type PrimaryKeyValue<E> = <<E as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType;

/// CRUD repository for entity `E` with active model `A`.
///
/// Holds no per-call state, so one shared instance serves every call chain.
/// Obtain it with [`Repository::instance`].
pub struct Repository<E, A> {
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Default for Repository<E, A> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E, A> std::fmt::Debug for Repository<E, A>
where
    E: EntityTrait,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &E::default().table_name())
            .finish()
    }
}

impl<E, A> Repository<E, A>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<A> + Serialize + DeserializeOwned + Clone + Send + Sync,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Clone + Send + 'static,
{
    /// The shared repository for this entity from the global registry
    pub fn instance() -> Arc<Self> {
        RepositoryRegistry::global().get_instance::<Self>()
    }

    /// Table name of the managed entity
    pub fn entity_name(&self) -> String {
        E::default().table_name().to_owned()
    }

    /// Insert a new row and return the stored model.
    pub async fn create(&self, model: A) -> DataResult<E::Model> {
        intercept(CREATE, move || async move {
            let session = ambient::require()?;
            let created = {
                let conn = session.connection().await?;
                model.insert(&*conn).await?
            };
            session.attach(1);
            Ok(created)
        })
        .await
    }

    /// Insert every row in one unit of work.
    pub async fn bulk_create(&self, models: Vec<A>) -> DataResult<Vec<E::Model>> {
        intercept(BULK_CREATE, move || async move {
            let session = ambient::require()?;
            let mut created = Vec::with_capacity(models.len());
            {
                let conn = session.connection().await?;
                for model in models {
                    created.push(model.insert(&*conn).await?);
                }
            }
            session.attach(created.len());
            Ok(created)
        })
        .await
    }

    /// Apply `patch` (a JSON object of column name to new value) to
    /// `instance` and persist it.
    ///
    /// Every key is validated before anything is written: an unknown column
    /// fails with `UnknownAttribute`, a changed primary key with
    /// `ImmutableAttribute`.
    pub async fn update(&self, instance: E::Model, patch: JsonValue) -> DataResult<E::Model> {
        intercept(UPDATE, move || async move {
            let (merged, touched) = self.apply_patch(&instance, patch)?;
            if touched.is_empty() {
                return Ok(instance);
            }

            let mut active: A = merged.clone().into_active_model();
            for column in touched {
                active.set(column, merged.get(column));
            }

            let session = ambient::require()?;
            let updated = {
                let conn = session.connection().await?;
                active.update(&*conn).await?
            };
            session.attach(1);
            Ok(updated)
        })
        .await
    }

    /// Insert when the primary key is not set, update otherwise. An update
    /// that matches no row falls back to an insert.
    pub async fn upsert(&self, model: A) -> DataResult<E::Model> {
        intercept(UPSERT, move || async move {
            let key_unset = E::PrimaryKey::iter().any(|key| model.is_not_set(key.into_column()));

            let session = ambient::require()?;
            let stored = {
                let conn = session.connection().await?;
                if key_unset {
                    model.insert(&*conn).await?
                } else {
                    match model.clone().update(&*conn).await {
                        Ok(updated) => updated,
                        Err(DbErr::RecordNotUpdated) | Err(DbErr::RecordNotFound(_)) => {
                            tracing::debug!(entity = %self.entity_name(), "Upsert found no row, inserting");
                            model.insert(&*conn).await?
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };
            session.attach(1);
            Ok(stored)
        })
        .await
    }

    pub async fn find_by_id(&self, id: PrimaryKeyValue<E>) -> DataResult<Option<E::Model>> {
        intercept(FIND_BY_ID, move || async move {
            let session = ambient::require()?;
            let found = {
                let conn = session.connection().await?;
                E::find_by_id(id).one(&*conn).await?
            };
            if found.is_some() {
                session.attach(1);
            }
            Ok(found)
        })
        .await
    }

    pub async fn find_all(&self) -> DataResult<Vec<E::Model>> {
        intercept(FIND_ALL, || async {
            let session = ambient::require()?;
            let rows = {
                let conn = session.connection().await?;
                E::find().all(&*conn).await?
            };
            session.attach(rows.len());
            Ok(rows)
        })
        .await
    }

    /// Rows `offset..offset + limit` in primary key order.
    pub async fn find_page(&self, offset: u64, limit: u64) -> DataResult<Vec<E::Model>> {
        intercept(FIND_PAGE, move || async move {
            let mut query = E::find();
            for key in E::PrimaryKey::iter() {
                query = query.order_by_asc(key.into_column());
            }

            let session = ambient::require()?;
            let rows = {
                let conn = session.connection().await?;
                query.offset(offset).limit(limit).all(&*conn).await?
            };
            session.attach(rows.len());
            Ok(rows)
        })
        .await
    }

    /// One page plus the total row count, read in the same unit of work.
    pub async fn find_paginated(&self, request: PageRequest) -> DataResult<Paginated<E::Model>> {
        intercept(FIND_PAGINATED, move || async move {
            let total = self.get_count().await?;
            let data = self.find_page(request.offset(), request.limit()).await?;
            Ok(Paginated::new(data, request, total))
        })
        .await
    }

    pub async fn get_count(&self) -> DataResult<u64> {
        intercept(GET_COUNT, || async {
            let session = ambient::require()?;
            let conn = session.connection().await?;
            let total = E::find().count(&*conn).await?;
            Ok(total)
        })
        .await
    }

    /// Delete the row behind `instance`. Returns whether a row was removed.
    pub async fn delete(&self, instance: E::Model) -> DataResult<bool> {
        intercept(DELETE, move || async move {
            let active: A = instance.into_active_model();
            let session = ambient::require()?;
            let conn = session.connection().await?;
            let result = active.delete(&*conn).await?;
            Ok(result.rows_affected > 0)
        })
        .await
    }

    /// Detach every entity from the active session.
    ///
    /// Not transactional: it needs a session opened by an enclosing scope and
    /// fails with `NoActiveSession` otherwise.
    pub async fn expunge_all(&self) -> DataResult<usize> {
        intercept(EXPUNGE_ALL, move || async move {
            let result = ambient::require().and_then(|session: Arc<Session>| session.expunge_all());
            match &result {
                Ok(count) => tracing::info!(entity = %self.entity_name(), count, "Session expunged"),
                Err(e) => tracing::error!(entity = %self.entity_name(), "Failed to expunge session: {}", e),
            }
            result
        })
        .await
    }

    /// Validate `patch` against the entity's columns and build the merged
    /// model plus the columns it changes.
    fn apply_patch(
        &self,
        instance: &E::Model,
        patch: JsonValue,
    ) -> DataResult<(E::Model, Vec<E::Column>)> {
        let JsonValue::Object(patch) = patch else {
            return Err(DataError::invalid_patch("expected a JSON object"));
        };

        let JsonValue::Object(mut fields) = serde_json::to_value(instance)? else {
            return Err(DataError::invalid_patch("model does not serialize to an object"));
        };

        let touched = self.validate_patch(&fields, &patch)?;
        for (key, value) in patch {
            fields.insert(key, value);
        }

        let merged: E::Model = serde_json::from_value(JsonValue::Object(fields))?;
        Ok((merged, touched))
    }

    fn validate_patch(
        &self,
        current: &Map<String, JsonValue>,
        patch: &Map<String, JsonValue>,
    ) -> DataResult<Vec<E::Column>> {
        let mut touched = Vec::with_capacity(patch.len());
        for (key, value) in patch {
            let column = E::Column::iter()
                .find(|column| column.as_str() == key)
                .ok_or_else(|| DataError::unknown_attribute(self.entity_name(), key.as_str()))?;

            let is_key = E::PrimaryKey::iter().any(|pk| pk.into_column().as_str() == key);
            if is_key {
                if current.get(key) != Some(value) {
                    return Err(DataError::ImmutableAttribute {
                        entity: self.entity_name(),
                        field: key.clone(),
                    });
                }
                continue;
            }
            touched.push(column);
        }
        Ok(touched)
    }
}
