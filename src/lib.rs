pub mod chat;
pub mod config;
pub mod game;
pub mod lobby;
pub mod online;
pub mod record;
pub mod session;
pub mod store;
pub mod thinker;
pub mod view;
