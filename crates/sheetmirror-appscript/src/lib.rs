//! HTTP transport for the spreadsheet script endpoint
//!
//! Provides [`AppsScriptClient`], a [`sheetmirror_core::RemoteStore`] that
//! speaks the endpoint's read (`GET`) and write (`POST`) protocol.

pub mod client;
pub mod config;

pub use client::AppsScriptClient;
pub use config::{AppsScriptConfig, AppsScriptConfigError, SCRIPT_URL_ENV};
