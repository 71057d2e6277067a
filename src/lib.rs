//! Grades and assignments scraper for the Aspen student portal.
//!
//! A [`service::GradeService`] logs users in through a small pool of
//! browser tabs, reads their grade list and per-class assignments from the
//! rendered pages and keeps the records in memory until logout.

pub mod browser;
pub mod business;
pub mod config;
pub mod extractor;
pub mod logging;
pub mod models;
pub mod pool;
pub mod scraping;
pub mod service;

pub use config::{LogSettings, PortalConfig};
pub use models::*;
pub use service::{GradeService, SessionHandle};
