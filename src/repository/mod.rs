use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::AppResult,
    models::{
        Decoded, Invoice, InvoicePatch, InvoiceStatus, InvoiceType, Lease, LeaseStatus,
        NewInvoice,
    },
};

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod table_service;

/// Lease listing filter. Results are ordered by `end_date` ascending.
#[derive(Debug, Clone, Default)]
pub struct LeaseQuery {
    pub statuses: Vec<LeaseStatus>,
    pub end_date_before: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

/// Invoice listing filter. Results are ordered by `due_date` ascending.
#[derive(Debug, Clone, Default)]
pub struct InvoiceQuery {
    pub statuses: Vec<InvoiceStatus>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub due_before: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn list_leases(&self, query: &LeaseQuery) -> AppResult<Vec<Decoded<Lease>>>;

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>>;

    async fn update_lease_status(&self, lease_id: &str, status: LeaseStatus) -> AppResult<Lease>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn list_invoices(&self, query: &InvoiceQuery) -> AppResult<Vec<Decoded<Invoice>>>;

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>>;

    /// Most recent invoice of `invoice_type` for the lease, by due date.
    async fn latest_lease_invoice(
        &self,
        lease_id: &str,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>>;

    async fn find_lease_invoice(
        &self,
        lease_id: &str,
        due_date: NaiveDate,
        invoice_type: InvoiceType,
    ) -> AppResult<Option<Invoice>>;

    /// Fails with `AppError::Conflict` when (lease, due date, type) exists.
    async fn create_invoice(&self, invoice: &NewInvoice) -> AppResult<Invoice>;

    async fn update_invoice(&self, invoice_id: &str, patch: &InvoicePatch) -> AppResult<Invoice>;
}
