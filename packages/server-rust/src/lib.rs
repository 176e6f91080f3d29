//! Validator key provisioner: accepts requests for batches of validator
//! keys, generates them in the background, and reports their status over
//! HTTP.

pub mod network;
pub mod service;
pub mod storage;
