pub mod admin;
pub mod broadcast;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod message;
pub mod moderation;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod web;
