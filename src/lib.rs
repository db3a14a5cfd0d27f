//! Face-based photo retrieval: index the faces in a photo session, then find
//! a person's photos from a selfie.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod health;
pub mod indexing;
pub mod logging;
pub mod search;
pub mod storage;
