pub mod config;
pub mod convert;
pub mod db;
pub mod indexer;
pub mod models;
pub mod search;
pub mod source;
pub mod table;
