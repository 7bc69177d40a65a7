use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::{InvoiceQuery, InvoiceRepository, LeaseQuery, LeaseRepository};
use crate::{
    error::{AppError, AppResult},
    models::{
        Decoded, Invoice, InvoicePatch, InvoiceType, Lease, LeaseStatus, NewInvoice, RecordError,
        ReminderState,
    },
};

#[derive(Default)]
struct Tables {
    leases: Vec<Lease>,
    invoices: Vec<Invoice>,
    malformed_leases: Vec<RecordError>,
    malformed_invoices: Vec<RecordError>,
    failing_writes: HashSet<String>,
    unavailable: bool,
    next_invoice: u32,
    concurrent_insert: Option<Invoice>,
}

/// Process-local store implementing both repositories, with the same
/// uniqueness guard and ordering as the Postgres tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_lease(&self, lease: Lease) {
        self.tables().leases.push(lease);
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        self.tables().invoices.push(invoice);
    }

    pub fn insert_malformed_lease(&self, id: &str, reason: &str) {
        self.tables().malformed_leases.push(RecordError {
            id: id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn insert_malformed_invoice(&self, id: &str, reason: &str) {
        self.tables().malformed_invoices.push(RecordError {
            id: id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Writes touching this id fail with a dependency error.
    pub fn fail_writes_for(&self, id: &str) {
        self.tables().failing_writes.insert(id.to_string());
    }

    /// Lands `invoice` just ahead of the next `create_invoice`, as a
    /// concurrent writer would between the pre-check and the insert.
    pub fn insert_before_next_create(&self, invoice: Invoice) {
        self.tables().concurrent_insert = Some(invoice);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.tables().unavailable = unavailable;
    }

    pub fn lease(&self, id: &str) -> Option<Lease> {
        self.tables().leases.iter().find(|lease| lease.id == id).cloned()
    }

    pub fn invoice(&self, id: &str) -> Option<Invoice> {
        self.tables()
            .invoices
            .iter()
            .find(|invoice| invoice.id == id)
            .cloned()
    }

    pub fn invoices_for_lease(&self, lease_id: &str) -> Vec<Invoice> {
        self.tables()
            .invoices
            .iter()
            .filter(|invoice| invoice.lease_id.as_deref() == Some(lease_id))
            .cloned()
            .collect()
    }
}

fn page<T>(mut items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let limit = limit.clamp(1, 1000) as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(limit);
    items
}

fn check_available(tables: &Tables) -> AppResult<()> {
    if tables.unavailable {
        return Err(AppError::Dependency("Database operation failed.".to_string()));
    }
    Ok(())
}

fn check_writable(tables: &Tables, id: &str) -> AppResult<()> {
    check_available(tables)?;
    if tables.failing_writes.contains(id) {
        return Err(AppError::Dependency("Database operation failed.".to_string()));
    }
    Ok(())
}

#[async_trait]
impl LeaseRepository for MemoryStore {
    async fn list_leases(&self, query: &LeaseQuery) -> AppResult<Vec<Decoded<Lease>>> {
        let tables = self.tables();
        check_available(&tables)?;

        let mut rows: Vec<Decoded<Lease>> = tables
            .malformed_leases
            .iter()
            .cloned()
            .map(Err)
            .collect();
        let mut leases = tables
            .leases
            .iter()
            .filter(|lease| query.statuses.is_empty() || query.statuses.contains(&lease.status))
            .filter(|lease| query.end_date_before.map_or(true, |before| lease.end_date < before))
            .cloned()
            .collect::<Vec<_>>();
        leases.sort_by(|a, b| a.end_date.cmp(&b.end_date).then_with(|| a.id.cmp(&b.id)));
        rows.extend(leases.into_iter().map(Ok));
        Ok(page(rows, query.limit, query.offset))
    }

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        let tables = self.tables();
        check_available(&tables)?;
        Ok(tables.leases.iter().find(|lease| lease.id == lease_id).cloned())
    }

    async fn update_lease_status(&self, lease_id: &str, status: LeaseStatus) -> AppResult<Lease> {
        let mut tables = self.tables();
        check_writable(&tables, lease_id)?;
        let lease = tables
            .leases
            .iter_mut()
            .find(|lease| lease.id == lease_id)
            .ok_or_else(|| AppError::NotFound("leases record not found.".to_string()))?;
        lease.status = status;
        Ok(lease.clone())
    }
}

#[async_trait]
impl InvoiceRepository for MemoryStore {
    async fn list_invoices(&self, query: &InvoiceQuery) -> AppResult<Vec<Decoded<Invoice>>> {
        let tables = self.tables();
        check_available(&tables)?;

        let mut rows: Vec<Decoded<Invoice>> = tables
            .malformed_invoices
            .iter()
            .cloned()
            .map(Err)
            .collect();
        let mut invoices = tables
            .invoices
            .iter()
            .filter(|i| query.statuses.is_empty() || query.statuses.contains(&i.status))
            .filter(|i| query.due_from.map_or(true, |from| i.due_date >= from))
            .filter(|i| query.due_to.map_or(true, |to| i.due_date <= to))
            .filter(|i| query.due_before.map_or(true, |before| i.due_date < before))
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        rows.extend(invoices.into_iter().map(Ok));
        Ok(page(rows, query.limit, query.offset))
    }

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        let tables = self.tables();
        check_available(&tables)?;
        Ok(tables.invoices.iter().find(|i| i.id == invoice_id).cloned())
    }

    async fn latest_lease_invoice(
        &self,
        lease_id: &str,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>> {
        let tables = self.tables();
        check_available(&tables)?;
        Ok(tables
            .invoices
            .iter()
            .filter(|i| i.lease_id.as_deref() == Some(lease_id) && i.invoice_type == invoice_type)
            .max_by_key(|i| i.due_date)
            .cloned())
    }

    async fn find_lease_invoice(
        &self,
        lease_id: &str,
        due_date: NaiveDate,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>> {
        let tables = self.tables();
        check_available(&tables)?;
        Ok(tables
            .invoices
            .iter()
            .find(|i| {
                i.lease_id.as_deref() == Some(lease_id)
                    && i.due_date == due_date
                    && i.invoice_type == invoice_type
            })
            .cloned())
    }

    async fn create_invoice(&self, invoice: &NewInvoice) -> AppResult<Invoice> {
        let mut tables = self.tables();
        if let Some(winner) = tables.concurrent_insert.take() {
            tables.invoices.push(winner);
        }
        if let Some(lease_id) = invoice.lease_id.as_deref() {
            check_writable(&tables, lease_id)?;
            let duplicate = tables.invoices.iter().any(|existing| {
                existing.lease_id.as_deref() == Some(lease_id)
                    && existing.due_date == invoice.due_date
                    && existing.invoice_type == invoice.invoice_type
            });
            if duplicate {
                return Err(AppError::Conflict(
                    "Duplicate value violates a unique constraint.".to_string(),
                ));
            }
        } else {
            check_available(&tables)?;
        }

        tables.next_invoice += 1;
        let created = Invoice {
            id: format!("inv-{}", tables.next_invoice),
            lease_id: invoice.lease_id.clone(),
            tenant_id: invoice.tenant_id.clone(),
            invoice_type: invoice.invoice_type,
            description: invoice.description.clone(),
            amount: invoice.amount,
            amount_paid: Decimal::ZERO,
            last_payment_date: None,
            due_date: invoice.due_date,
            status: invoice.status,
            owner_amount: invoice.owner_amount,
            management_fee: invoice.management_fee,
            reminder: ReminderState::default(),
        };
        tables.invoices.push(created.clone());
        Ok(created)
    }

    async fn update_invoice(&self, invoice_id: &str, patch: &InvoicePatch) -> AppResult<Invoice> {
        let mut tables = self.tables();
        check_writable(&tables, invoice_id)?;
        let invoice = tables
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice_id)
            .ok_or_else(|| AppError::NotFound("invoices record not found.".to_string()))?;
        if let Some(status) = patch.status {
            invoice.status = status;
        }
        if let Some(amount_paid) = patch.amount_paid {
            invoice.amount_paid = amount_paid;
        }
        if let Some(paid_on) = patch.last_payment_date {
            invoice.last_payment_date = Some(paid_on);
        }
        if let Some(reminder) = &patch.reminder {
            invoice.reminder = reminder.clone();
        }
        Ok(invoice.clone())
    }
}
