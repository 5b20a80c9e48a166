//! Core library: detection normalisation, upload sessions, descriptions, records.

pub mod chat;
pub mod confidence;
pub mod config;
pub mod description;
pub mod detection;
pub mod models;
pub mod pipeline;
pub mod records;
pub mod resolve;
pub mod session;
pub mod severity;
