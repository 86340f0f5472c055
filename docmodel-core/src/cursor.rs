//! Lazy, immutable query cursors.
//!
//! A [`Cursor`] is a query specification: translated conditions, sort keys and
//! a window (skip + limit). Chaining methods return new cursors and never
//! touch the store; the store is queried only by [`fetch`](Cursor::fetch),
//! [`stream`](Cursor::stream), [`at`](Cursor::at), [`count`](Cursor::count),
//! [`is_empty`](Cursor::is_empty) and [`page`](Cursor::page), and every call
//! queries again.
//!
//! ```ignore
//! let hacking = UserTag::find(doc! { "user": "Jack" })
//!     .sort("tag")
//!     .find(doc! { "tag": "Hacking" })
//!     .fetch()
//!     .await?;
//! ```

use bson::Document;
use futures::{StreamExt, stream, stream::BoxStream};
use std::{fmt, marker::PhantomData};

use crate::{
    error::DocumentStoreResult,
    model::ModelExt,
    page::{Page, PaginationParams},
    query::{Conditions, Query, Sort},
};

pub struct Cursor<M> {
    conditions: Document,
    orders: Vec<Sort>,
    skip: u64,
    limit: Option<u64>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Cursor<M> {
    /// A cursor over documents matching already translated `conditions`.
    pub(crate) fn new(conditions: Document) -> Self {
        Cursor {
            conditions,
            orders: Vec::new(),
            skip: 0,
            limit: None,
            _model: PhantomData,
        }
    }

    /// Conditions keyed by storage keys.
    pub fn conditions(&self) -> &Document {
        &self.conditions
    }

    pub fn orders(&self) -> &[Sort] {
        &self.orders
    }

    /// The `(skip, limit)` window.
    pub fn window(&self) -> (u64, Option<u64>) {
        (self.skip, self.limit)
    }

    /// Skips `n` more results, relative to the current window.
    pub fn skip(&self, n: u64) -> Self {
        Cursor {
            skip: self.skip.saturating_add(n),
            limit: self.limit.map(|limit| limit.saturating_sub(n)),
            ..self.clone()
        }
    }

    /// Returns at most `n` results.
    pub fn limit(&self, n: u64) -> Self {
        Cursor {
            limit: Some(self.limit.map_or(n, |limit| limit.min(n))),
            ..self.clone()
        }
    }

    /// Results `start..end` of the current window.
    pub fn slice(&self, start: u64, end: u64) -> Self {
        self.skip(start).limit(end.saturating_sub(start))
    }

    /// Results of page `page` (1-indexed, clamped up to 1) of size `count`.
    pub fn paginate(&self, page: u64, count: u64) -> Self {
        let params = PaginationParams::new(page, count);
        self.slice(params.offset(), params.end())
    }

    /// The find request this cursor stands for.
    pub fn to_query(&self) -> Query {
        Query {
            filter: self.conditions.clone(),
            sort: self.orders.clone(),
            skip: (self.skip > 0).then_some(self.skip),
            limit: self.limit,
        }
    }
}

impl<M: ModelExt> Cursor<M> {
    /// Narrows the cursor. Conditions on a key that already holds operators
    /// merge operator by operator; anything else replaces the old condition.
    pub fn find<C: Into<Conditions>>(&self, conditions: C) -> Self {
        let merged = Conditions::from(self.conditions.clone()).merge(M::filter_condition(conditions));
        Cursor {
            conditions: merged.into_document(),
            ..self.clone()
        }
    }

    /// Adds a sort key: `"name"` ascending, `"-name"` descending. Sorting on a
    /// key again replaces its direction in place.
    pub fn sort(&self, spec: &str) -> Self {
        let sort = Sort::parse(spec);
        let sort = Sort {
            field: M::schema().storage_key(&sort.field).to_string(),
            ..sort
        };

        let mut orders = self.orders.clone();
        match orders.iter_mut().find(|order| order.field == sort.field) {
            Some(order) => *order = sort,
            None => orders.push(sort),
        }
        Cursor { orders, ..self.clone() }
    }

    /// Runs the query and rehydrates every result.
    pub async fn fetch(&self) -> DocumentStoreResult<Vec<M>> {
        if self.limit == Some(0) {
            return Ok(Vec::new());
        }

        let ns = M::namespace();
        let query = self.to_query();
        tracing::debug!(%ns, ?query, "find");
        M::connection()
            .await?
            .find(&ns, query)
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    /// A stream of results that runs the query when first polled.
    pub fn stream(&self) -> BoxStream<'static, DocumentStoreResult<M>> {
        let cursor = self.clone();
        stream::once(async move { cursor.fetch().await })
            .map(|fetched| {
                stream::iter(match fetched {
                    Ok(models) => models.into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(err)],
                })
            })
            .flatten()
            .boxed()
    }

    /// The result at `index` of the current window.
    pub async fn at(&self, index: u64) -> DocumentStoreResult<Option<M>> {
        if self.limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        Ok(self.slice(index, index.saturating_add(1)).fetch().await?.into_iter().next())
    }

    pub async fn first(&self) -> DocumentStoreResult<Option<M>> {
        self.at(0).await
    }

    /// Number of documents matching the conditions, regardless of the window.
    pub async fn count(&self) -> DocumentStoreResult<u64> {
        let ns = M::namespace();
        M::connection().await?.count(&ns, self.conditions.clone()).await
    }

    pub async fn is_empty(&self) -> DocumentStoreResult<bool> {
        Ok(self.first().await?.is_none())
    }

    /// One page of results with navigation metadata.
    pub async fn page(&self, page: u64, per_page: u64) -> DocumentStoreResult<Page<M>> {
        let params = PaginationParams::new(page, per_page);
        let items = self.paginate(params.page, params.per_page).fetch().await?;
        let count = self.count().await?;
        Ok(params.page(items, count))
    }
}

impl<M> Clone for Cursor<M> {
    fn clone(&self) -> Self {
        Cursor {
            conditions: self.conditions.clone(),
            orders: self.orders.clone(),
            skip: self.skip,
            limit: self.limit,
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Cursor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("model", &std::any::type_name::<M>())
            .field("conditions", &self.conditions)
            .field("orders", &self.orders)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::Field,
        model::Model,
        schema::{HasIdentifier, ModelSchema, Schema},
    };
    use bson::{doc, oid::ObjectId};
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Default)]
    struct Score {
        id: Option<ObjectId>,
        player: Option<String>,
        points: Option<i64>,
    }

    impl Schema for Score {
        fn schema() -> &'static ModelSchema<Self> {
            static SCHEMA: OnceLock<ModelSchema<Score>> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                ModelSchema::register(
                    "Score",
                    None,
                    vec![
                        Field::new::<Option<ObjectId>>("id", |m| &m.id, |m| &mut m.id),
                        Field::new::<Option<String>>("player", |m: &Score| &m.player, |m: &mut Score| &mut m.player).with_key("p"),
                        Field::new::<Option<i64>>("points", |m| &m.points, |m| &mut m.points),
                    ],
                )
            })
        }
    }

    impl HasIdentifier for Score {}

    #[async_trait::async_trait]
    impl Model for Score {}

    #[test]
    fn chaining_never_mutates_the_receiver() {
        let base = Score::find(doc! { "player": "ann" });
        let narrowed = base.find(doc! { "points": { "$gt": 1 } }).sort("-points").limit(3);

        assert_eq!(base.conditions(), &doc! { "p": "ann" });
        assert!(base.orders().is_empty());
        assert_eq!(base.window(), (0, None));

        assert_eq!(narrowed.conditions(), &doc! { "p": "ann", "points": { "$gt": 1 } });
        assert_eq!(narrowed.orders(), &[Sort::desc("points")]);
        assert_eq!(narrowed.window(), (0, Some(3)));
    }

    #[test]
    fn overlapping_range_conditions_merge() {
        let cursor = Score::find(doc! { "points": { "$gte": 1, "$lt": 10 } })
            .find(doc! { "points": { "$lt": 5, "$ne": 3 } });
        assert_eq!(
            cursor.conditions(),
            &doc! { "points": { "$gte": 1, "$lt": 5, "$ne": 3 } }
        );
    }

    #[test]
    fn sorting_translates_and_replaces_keys() {
        let cursor = Score::all().sort("player").sort("-points").sort("-player");
        assert_eq!(cursor.orders(), &[Sort::desc("p"), Sort::desc("points")]);
    }

    #[test]
    fn pagination_computes_windows() {
        let cursor = Score::all();
        assert_eq!(cursor.paginate(2, 10).window(), (10, Some(10)));
        assert_eq!(cursor.paginate(0, 10).window(), cursor.paginate(1, 10).window());

        let query = cursor.paginate(3, 10).to_query();
        assert_eq!((query.skip, query.limit), (Some(20), Some(10)));
    }

    #[test]
    fn slices_compose_within_the_window() {
        let cursor = Score::all().slice(10, 20).slice(5, 50);
        assert_eq!(cursor.window(), (15, Some(5)));

        let cursor = Score::all().limit(4).skip(6);
        assert_eq!(cursor.window(), (6, Some(0)));
    }

    #[test]
    fn windows_saturate_at_the_end_of_the_range() {
        let cursor = Score::all().skip(u64::MAX).skip(1);
        assert_eq!(cursor.window(), (u64::MAX, None));

        let cursor = Score::all().paginate(u64::MAX, 10);
        assert_eq!(cursor.window(), (u64::MAX, Some(0)));

        let cursor = Score::all().slice(u64::MAX, u64::MAX);
        assert_eq!(cursor.window(), (u64::MAX, Some(0)));
    }

    #[tokio::test]
    async fn indexing_past_the_end_reads_nothing() {
        assert!(Score::all().at(u64::MAX).await.unwrap().is_none());
    }
}
