pub mod admin;
pub mod chat;
pub mod events;
pub mod files;
pub mod health;
pub mod invitations;
pub mod models;
pub mod profile;
pub mod public;
pub mod query;
