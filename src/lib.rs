//! Teahouse - backend service for an online tea shop.
//!
//! This library exposes the storage, auth, and web modules so integration
//! tests can drive the service in-process.

pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
pub mod web;
