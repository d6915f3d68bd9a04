use super::{
    BatchQuery, BatchUpdate, ServiceQuery, ServiceSort, ServiceUpdate, SettlementStore, SortDir,
    scoped_partner,
};
use crate::models::{NoteLogEntry, PaymentBatch, RecordId, Scope, Service};
use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// In-memory [`SettlementStore`] for tests and local development. Matches the
/// Mongo store's observable behavior, including canonical-form id matching
/// and the write-time `updated_at` bump.
#[derive(Default)]
pub struct MemoryStore {
    services: RwLock<Vec<Service>>,
    batches: RwLock<Vec<PaymentBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a batch as-is, preserving its timestamps and id shapes. Lets
    /// tests reproduce legacy link sets that the API would canonicalize.
    pub async fn seed_batch(&self, batch: PaymentBatch) {
        self.batches.write().await.push(batch);
    }

    pub async fn seed_service(&self, service: Service) {
        self.services.write().await.push(service);
    }
}

fn matches_service(scope: &Scope, query: &ServiceQuery, service: &Service) -> bool {
    if !scope.allows(&service.partner_id) {
        return false;
    }
    if let Some(partner) = scoped_partner(scope, query.partner.as_deref()) {
        if RecordId::canonicalize(partner) != service.partner_id.canonical() {
            return false;
        }
    }
    if let Some(service_type) = &query.service_type {
        if &service.service_type_id != service_type {
            return false;
        }
    }
    if let Some(team) = &query.team {
        if &service.team != team {
            return false;
        }
    }
    if let Some(status) = &query.status {
        if &service.status != status {
            return false;
        }
    }
    if let Some(from) = query.date_from {
        if service.service_date < from {
            return false;
        }
    }
    if let Some(to) = query.date_to {
        if service.service_date > to {
            return false;
        }
    }
    if let Some(text) = &query.text {
        let needle = text.to_lowercase();
        let haystacks = [
            service.first_name.to_lowercase(),
            service.last_name.to_lowercase(),
            service.client_name.to_lowercase(),
        ];
        if !haystacks.iter().any(|h| h.contains(&needle)) {
            return false;
        }
    }
    true
}

fn paginate<T>(mut items: Vec<T>, page: u64, page_size: u64) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    if page_size > 0 {
        let skip = (page.saturating_sub(1) * page_size) as usize;
        items = items
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();
    }
    (items, total)
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_service(&self, service: &Service) -> Result<(), AppError> {
        self.services.write().await.push(service.clone());
        Ok(())
    }

    async fn insert_services(&self, services: &[Service]) -> Result<(), AppError> {
        self.services.write().await.extend(services.iter().cloned());
        Ok(())
    }

    async fn find_service(&self, scope: &Scope, id: &str) -> Result<Option<Service>, AppError> {
        let canonical = RecordId::canonicalize(id);
        Ok(self
            .services
            .read()
            .await
            .iter()
            .find(|s| s.id.canonical() == canonical && scope.allows(&s.partner_id))
            .cloned())
    }

    async fn list_services(
        &self,
        scope: &Scope,
        query: &ServiceQuery,
    ) -> Result<(Vec<Service>, u64), AppError> {
        let mut matches: Vec<Service> = self
            .services
            .read()
            .await
            .iter()
            .filter(|s| matches_service(scope, query, s))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            let primary = match query.sort {
                ServiceSort::ServiceDate => a.service_date.cmp(&b.service_date),
                ServiceSort::CreatedAt => a.created_at.cmp(&b.created_at),
                ServiceSort::FinalValue => a
                    .final_value
                    .partial_cmp(&b.final_value)
                    .unwrap_or(Ordering::Equal),
                ServiceSort::FirstName => a.first_name.cmp(&b.first_name),
            };
            let primary = match query.dir {
                SortDir::Asc => primary,
                SortDir::Desc => primary.reverse(),
            };
            primary.then_with(|| b.id.canonical().cmp(&a.id.canonical()))
        });

        Ok(paginate(matches, query.page, query.page_size))
    }

    async fn services_by_ids(&self, ids: &[String]) -> Result<Vec<Service>, AppError> {
        let wanted: HashSet<String> = ids.iter().map(|id| RecordId::canonicalize(id)).collect();
        Ok(self
            .services
            .read()
            .await
            .iter()
            .filter(|s| wanted.contains(&s.id.canonical()))
            .cloned()
            .collect())
    }

    async fn update_service(
        &self,
        id: &str,
        update: &ServiceUpdate,
    ) -> Result<Option<Service>, AppError> {
        let canonical = RecordId::canonicalize(id);
        let mut services = self.services.write().await;
        let Some(service) = services.iter_mut().find(|s| s.id.canonical() == canonical) else {
            return Ok(None);
        };
        if let Some(partner_id) = &update.partner_id {
            service.partner_id = RecordId::plain(partner_id);
        }
        if let Some(service_date) = update.service_date {
            service.service_date = service_date;
        }
        if let Some(first_name) = &update.first_name {
            service.first_name = first_name.clone();
        }
        if let Some(last_name) = &update.last_name {
            service.last_name = last_name.clone();
        }
        if let Some(client_name) = &update.client_name {
            service.client_name = client_name.clone();
        }
        if let Some(park) = &update.park {
            service.park = park.clone();
        }
        if let Some(location) = &update.location {
            service.location = location.clone();
        }
        if let Some(guests) = update.guests {
            service.guests = Some(guests);
        }
        if let Some(hopper) = update.hopper {
            service.hopper = hopper;
        }
        if let Some(team) = &update.team {
            service.team = team.clone();
        }
        if let Some(service_type_id) = &update.service_type_id {
            service.service_type_id = service_type_id.clone();
        }
        if let Some(service_time) = update.service_time {
            service.service_time = Some(service_time);
        }
        if let Some(observations) = &update.observations {
            service.observations = observations.clone();
        }
        if let Some(final_value) = update.final_value {
            service.final_value = final_value;
        }
        if let Some(override_value) = update.override_value {
            service.override_value = Some(override_value);
        }
        if let Some(status) = update.status {
            service.status = status;
        }
        service.updated_at = Utc::now();
        Ok(Some(service.clone()))
    }

    async fn delete_service(&self, id: &str) -> Result<bool, AppError> {
        let canonical = RecordId::canonicalize(id);
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|s| s.id.canonical() != canonical);
        Ok(services.len() < before)
    }

    async fn insert_batch(&self, batch: &PaymentBatch) -> Result<(), AppError> {
        self.batches.write().await.push(batch.clone());
        Ok(())
    }

    async fn find_batch(&self, scope: &Scope, id: &str) -> Result<Option<PaymentBatch>, AppError> {
        let canonical = RecordId::canonicalize(id);
        Ok(self
            .batches
            .read()
            .await
            .iter()
            .find(|b| b.id.canonical() == canonical && scope.allows(&b.partner_id))
            .cloned())
    }

    async fn list_batches(
        &self,
        scope: &Scope,
        query: &BatchQuery,
    ) -> Result<(Vec<PaymentBatch>, u64), AppError> {
        let mut matches: Vec<PaymentBatch> = self
            .batches
            .read()
            .await
            .iter()
            .filter(|b| {
                if !scope.allows(&b.partner_id) {
                    return false;
                }
                if let Some(partner) = scoped_partner(scope, query.partner.as_deref()) {
                    if RecordId::canonicalize(partner) != b.partner_id.canonical() {
                        return false;
                    }
                }
                if let Some(status) = &query.status {
                    if &b.status != status {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.canonical().cmp(&a.id.canonical()))
        });

        Ok(paginate(matches, query.page, query.page_size))
    }

    async fn partner_batches(&self, partner_id: &str) -> Result<Vec<PaymentBatch>, AppError> {
        let canonical = RecordId::canonicalize(partner_id);
        Ok(self
            .batches
            .read()
            .await
            .iter()
            .filter(|b| b.partner_id.canonical() == canonical)
            .cloned()
            .collect())
    }

    async fn batches_linking(
        &self,
        service_ids: &[String],
    ) -> Result<Vec<PaymentBatch>, AppError> {
        let wanted: HashSet<String> = service_ids
            .iter()
            .map(|id| RecordId::canonicalize(id))
            .collect();
        Ok(self
            .batches
            .read()
            .await
            .iter()
            .filter(|b| b.service_ids.iter().any(|sid| wanted.contains(&sid.canonical())))
            .cloned()
            .collect())
    }

    async fn update_batch(
        &self,
        id: &str,
        update: &BatchUpdate,
    ) -> Result<Option<PaymentBatch>, AppError> {
        let canonical = RecordId::canonicalize(id);
        let mut batches = self.batches.write().await;
        let Some(batch) = batches.iter_mut().find(|b| b.id.canonical() == canonical) else {
            return Ok(None);
        };
        if let Some(partner_id) = &update.partner_id {
            batch.partner_id = RecordId::plain(partner_id);
        }
        if let Some(partner_name) = &update.partner_name {
            batch.partner_name = partner_name.clone();
        }
        if let Some(period_from) = update.period_from {
            batch.period_from = Some(period_from);
        }
        if let Some(period_to) = update.period_to {
            batch.period_to = Some(period_to);
        }
        if let Some(week_key) = &update.week_key {
            batch.week_key = Some(week_key.clone());
        }
        if let Some(week_start) = update.week_start {
            batch.week_start = Some(week_start);
        }
        if let Some(week_end) = update.week_end {
            batch.week_end = Some(week_end);
        }
        if let Some(service_ids) = &update.service_ids {
            batch.service_ids = service_ids.clone();
        }
        if let Some(total) = update.total {
            batch.total = total;
        }
        if let Some(status) = update.status {
            batch.status = status;
        }
        if let Some(notes) = &update.notes {
            batch.notes = notes.clone();
        }
        batch.updated_at = Utc::now();
        Ok(Some(batch.clone()))
    }

    async fn push_note(
        &self,
        id: &str,
        entry: &NoteLogEntry,
    ) -> Result<Option<PaymentBatch>, AppError> {
        let canonical = RecordId::canonicalize(id);
        let mut batches = self.batches.write().await;
        let Some(batch) = batches.iter_mut().find(|b| b.id.canonical() == canonical) else {
            return Ok(None);
        };
        batch.notes_log.push(entry.clone());
        batch.updated_at = Utc::now();
        Ok(Some(batch.clone()))
    }

    async fn delete_batch(&self, id: &str) -> Result<bool, AppError> {
        let canonical = RecordId::canonicalize(id);
        let mut batches = self.batches.write().await;
        let before = batches.len();
        batches.retain(|b| b.id.canonical() != canonical);
        Ok(batches.len() < before)
    }
}
