pub mod admin;
pub mod artifact;
pub mod attachment;
pub mod auth;
pub mod context;
pub mod error;
pub mod invite;
pub mod item;
pub mod notification;
pub mod query;
pub mod storage;
pub mod waitlist;

#[cfg(test)]
pub mod test_utils;

pub use error::*;
