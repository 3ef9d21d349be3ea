pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod flash;
pub mod mail;
pub mod pages;
pub mod state;
