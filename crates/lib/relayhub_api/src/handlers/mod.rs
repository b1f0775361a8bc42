//! Request handlers.

pub mod fulfillment;
pub mod oauth;
pub mod report_state;
pub mod request_sync;
