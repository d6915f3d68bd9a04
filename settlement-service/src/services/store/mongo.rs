use super::{
    BatchQuery, BatchUpdate, ServiceQuery, ServiceUpdate, SettlementStore, SortDir, scoped_partner,
};
use crate::models::{NoteLogEntry, PaymentBatch, RecordId, Scope, Service};
use crate::services::ids;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document, doc};
use mongodb::options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use service_core::error::AppError;

/// Mongo-backed [`SettlementStore`] over the `services` and `payments`
/// collections.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    services: Collection<Service>,
    batches: Collection<PaymentBatch>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.app_name = Some("settlement-service".to_string());
        let client = Client::with_options(options)?;
        Ok(Self::new(&client.database(database)))
    }

    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            services: db.collection("services"),
            batches: db.collection("payments"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let partner_date_index = IndexModel::builder()
            .keys(doc! { "partner_id": 1, "service_date": -1 })
            .options(
                IndexOptions::builder()
                    .name("partner_service_date_idx".to_string())
                    .build(),
            )
            .build();

        let type_date_index = IndexModel::builder()
            .keys(doc! { "service_type_id": 1, "service_date": -1 })
            .options(
                IndexOptions::builder()
                    .name("service_type_date_idx".to_string())
                    .build(),
            )
            .build();

        let date_index = IndexModel::builder()
            .keys(doc! { "service_date": -1 })
            .options(
                IndexOptions::builder()
                    .name("service_date_idx".to_string())
                    .build(),
            )
            .build();

        self.services
            .create_indexes([partner_date_index, type_date_index, date_index], None)
            .await?;

        let partner_status_index = IndexModel::builder()
            .keys(doc! { "partner_id": 1, "status": 1, "week_start": -1 })
            .options(
                IndexOptions::builder()
                    .name("partner_status_week_idx".to_string())
                    .build(),
            )
            .build();

        let created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("batch_created_idx".to_string())
                    .build(),
            )
            .build();

        // Multikey index backing the one-round-trip link lookups.
        let links_index = IndexModel::builder()
            .keys(doc! { "service_ids": 1 })
            .options(
                IndexOptions::builder()
                    .name("service_links_idx".to_string())
                    .build(),
            )
            .build();

        self.batches
            .create_indexes([partner_status_index, created_index, links_index], None)
            .await?;

        tracing::info!("settlement store indexes initialized");
        Ok(())
    }
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson, AppError> {
    mongodb::bson::to_bson(value)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("BSON encode failed: {}", e)))
}

/// Escape user text for use inside a `$regex` substring match.
fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if ".*+?^${}()|[]\\".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn with_scope(mut filter: Document, scope: &Scope) -> Document {
    if let Scope::Partner(partner) = scope {
        filter.insert("partner_id", doc! { "$in": ids::id_candidates(partner) });
    }
    filter
}

fn sort_dir(dir: SortDir) -> i32 {
    match dir {
        SortDir::Asc => 1,
        SortDir::Desc => -1,
    }
}

#[async_trait]
impl SettlementStore for MongoStore {
    async fn ping(&self) -> Result<(), AppError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn insert_service(&self, service: &Service) -> Result<(), AppError> {
        self.services.insert_one(service, None).await?;
        Ok(())
    }

    async fn insert_services(&self, services: &[Service]) -> Result<(), AppError> {
        if services.is_empty() {
            return Ok(());
        }
        self.services.insert_many(services, None).await?;
        Ok(())
    }

    async fn find_service(&self, scope: &Scope, id: &str) -> Result<Option<Service>, AppError> {
        let filter = with_scope(ids::id_filter("_id", id), scope);
        Ok(self.services.find_one(filter, None).await?)
    }

    async fn list_services(
        &self,
        scope: &Scope,
        query: &ServiceQuery,
    ) -> Result<(Vec<Service>, u64), AppError> {
        let mut filter = Document::new();
        if let Some(partner) = scoped_partner(scope, query.partner.as_deref()) {
            filter.insert("partner_id", doc! { "$in": ids::id_candidates(partner) });
        }
        if let Some(service_type) = &query.service_type {
            filter.insert("service_type_id", service_type.clone());
        }
        if let Some(team) = &query.team {
            filter.insert("team", team.clone());
        }
        if let Some(status) = &query.status {
            filter.insert("status", to_bson(status)?);
        }
        let mut date_range = Document::new();
        if let Some(from) = query.date_from {
            date_range.insert("$gte", BsonDateTime::from_chrono(from));
        }
        if let Some(to) = query.date_to {
            date_range.insert("$lte", BsonDateTime::from_chrono(to));
        }
        if !date_range.is_empty() {
            filter.insert("service_date", date_range);
        }
        if let Some(text) = &query.text {
            let pattern = doc! { "$regex": escape_regex(text), "$options": "i" };
            filter.insert(
                "$or",
                vec![
                    doc! { "first_name": pattern.clone() },
                    doc! { "last_name": pattern.clone() },
                    doc! { "client_name": pattern },
                ],
            );
        }

        let total = self.services.count_documents(filter.clone(), None).await?;

        let sort = doc! { query.sort.field(): sort_dir(query.dir), "_id": -1 };
        let options = if query.page_size > 0 {
            FindOptions::builder()
                .sort(sort)
                .skip(query.page.saturating_sub(1) * query.page_size)
                .limit(query.page_size as i64)
                .build()
        } else {
            FindOptions::builder().sort(sort).build()
        };

        let cursor = self.services.find(filter, Some(options)).await?;
        let services: Vec<Service> = cursor.try_collect().await?;
        Ok((services, total))
    }

    async fn services_by_ids(&self, ids_in: &[String]) -> Result<Vec<Service>, AppError> {
        if ids_in.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ids::ids_filter("_id", ids_in);
        let cursor = self.services.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_service(
        &self,
        id: &str,
        update: &ServiceUpdate,
    ) -> Result<Option<Service>, AppError> {
        let mut set = Document::new();
        if let Some(partner_id) = &update.partner_id {
            set.insert("partner_id", RecordId::canonicalize(partner_id));
        }
        if let Some(service_date) = update.service_date {
            set.insert("service_date", BsonDateTime::from_chrono(service_date));
        }
        if let Some(first_name) = &update.first_name {
            set.insert("first_name", first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            set.insert("last_name", last_name.clone());
        }
        if let Some(client_name) = &update.client_name {
            set.insert("client_name", client_name.clone());
        }
        if let Some(park) = &update.park {
            set.insert("park", park.clone());
        }
        if let Some(location) = &update.location {
            set.insert("location", location.clone());
        }
        if let Some(guests) = update.guests {
            set.insert("guests", guests);
        }
        if let Some(hopper) = update.hopper {
            set.insert("hopper", hopper);
        }
        if let Some(team) = &update.team {
            set.insert("team", team.clone());
        }
        if let Some(service_type_id) = &update.service_type_id {
            set.insert("service_type_id", service_type_id.clone());
        }
        if let Some(service_time) = update.service_time {
            set.insert("service_time", service_time);
        }
        if let Some(observations) = &update.observations {
            set.insert("observations", observations.clone());
        }
        if let Some(final_value) = update.final_value {
            set.insert("final_value", final_value);
        }
        if let Some(override_value) = update.override_value {
            set.insert("override_value", override_value);
        }
        if let Some(status) = &update.status {
            set.insert("status", to_bson(status)?);
        }
        set.insert("updated_at", BsonDateTime::now());

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .services
            .find_one_and_update(ids::id_filter("_id", id), doc! { "$set": set }, options)
            .await?)
    }

    async fn delete_service(&self, id: &str) -> Result<bool, AppError> {
        let result = self
            .services
            .delete_one(ids::id_filter("_id", id), None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn insert_batch(&self, batch: &PaymentBatch) -> Result<(), AppError> {
        self.batches.insert_one(batch, None).await?;
        Ok(())
    }

    async fn find_batch(&self, scope: &Scope, id: &str) -> Result<Option<PaymentBatch>, AppError> {
        let filter = with_scope(ids::id_filter("_id", id), scope);
        Ok(self.batches.find_one(filter, None).await?)
    }

    async fn list_batches(
        &self,
        scope: &Scope,
        query: &BatchQuery,
    ) -> Result<(Vec<PaymentBatch>, u64), AppError> {
        let mut filter = Document::new();
        if let Some(partner) = scoped_partner(scope, query.partner.as_deref()) {
            filter.insert("partner_id", doc! { "$in": ids::id_candidates(partner) });
        }
        if let Some(status) = &query.status {
            filter.insert("status", to_bson(status)?);
        }

        let total = self.batches.count_documents(filter.clone(), None).await?;

        let sort = doc! { "created_at": -1, "_id": -1 };
        let options = if query.page_size > 0 {
            FindOptions::builder()
                .sort(sort)
                .skip(query.page.saturating_sub(1) * query.page_size)
                .limit(query.page_size as i64)
                .build()
        } else {
            FindOptions::builder().sort(sort).build()
        };

        let cursor = self.batches.find(filter, Some(options)).await?;
        let batches: Vec<PaymentBatch> = cursor.try_collect().await?;
        Ok((batches, total))
    }

    async fn partner_batches(&self, partner_id: &str) -> Result<Vec<PaymentBatch>, AppError> {
        let filter = ids::id_filter("partner_id", partner_id);
        let cursor = self.batches.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn batches_linking(
        &self,
        service_ids: &[String],
    ) -> Result<Vec<PaymentBatch>, AppError> {
        if service_ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ids::ids_filter("service_ids", service_ids);
        let cursor = self.batches.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_batch(
        &self,
        id: &str,
        update: &BatchUpdate,
    ) -> Result<Option<PaymentBatch>, AppError> {
        let mut set = Document::new();
        if let Some(partner_id) = &update.partner_id {
            set.insert("partner_id", RecordId::canonicalize(partner_id));
        }
        if let Some(partner_name) = &update.partner_name {
            set.insert("partner_name", partner_name.clone());
        }
        if let Some(period_from) = update.period_from {
            set.insert("period_from", period_from);
        }
        if let Some(period_to) = update.period_to {
            set.insert("period_to", period_to);
        }
        if let Some(week_key) = &update.week_key {
            set.insert("week_key", week_key.clone());
        }
        if let Some(week_start) = update.week_start {
            set.insert("week_start", week_start);
        }
        if let Some(week_end) = update.week_end {
            set.insert("week_end", week_end);
        }
        if let Some(service_ids) = &update.service_ids {
            set.insert("service_ids", to_bson(service_ids)?);
        }
        if let Some(total) = update.total {
            set.insert("total", total);
        }
        if let Some(status) = &update.status {
            set.insert("status", to_bson(status)?);
        }
        if let Some(notes) = &update.notes {
            set.insert("notes", notes.clone());
        }
        set.insert("updated_at", BsonDateTime::now());

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .batches
            .find_one_and_update(ids::id_filter("_id", id), doc! { "$set": set }, options)
            .await?)
    }

    async fn push_note(
        &self,
        id: &str,
        entry: &NoteLogEntry,
    ) -> Result<Option<PaymentBatch>, AppError> {
        let update = doc! {
            "$push": { "notes_log": to_bson(entry)? },
            "$set": { "updated_at": BsonDateTime::now() },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .batches
            .find_one_and_update(ids::id_filter("_id", id), update, options)
            .await?)
    }

    async fn delete_batch(&self, id: &str) -> Result<bool, AppError> {
        let result = self
            .batches
            .delete_one(ids::id_filter("_id", id), None)
            .await?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_escape_neutralizes_metacharacters() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("(test)"), "\\(test\\)");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn scope_filter_adds_partner_candidates() {
        let filter = with_scope(doc! {}, &Scope::Partner("partner-1".to_string()));
        assert!(filter.contains_key("partner_id"));
        let filter = with_scope(doc! {}, &Scope::All);
        assert!(filter.is_empty());
    }
}
