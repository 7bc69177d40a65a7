pub mod billing_engine;
pub mod invoice_generation;
pub mod notifications;
pub mod payments;
pub mod recurrence;
pub mod reminders;
pub mod scheduler;
pub mod status_transitions;
