pub mod api;
pub mod blank;
pub mod config;
pub mod includes;
pub mod network;
pub mod snowflake;
