//! Scenario-based tests for pipeline-scheduler


mod cancellation;
mod contract_mismatch;
mod diamond;
mod process_backend;
mod redundant_notification;
mod unknown_producer;
mod version_conflict;
