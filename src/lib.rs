pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dedup;
pub mod driver;
pub mod model;
pub mod notify;
pub mod playlist;
pub mod sync;
pub mod telegram;
