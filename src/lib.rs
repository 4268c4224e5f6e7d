//! Kibble - pet food storefront backend
//!
//! Catalog, one-off orders, and recurring deliveries paid through MercadoPago
//! or Stripe. Gateway webhooks reconcile payments; a cron endpoint bills
//! subscriptions that keep a saved card with us.

pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod rate_limit;
pub mod util;
