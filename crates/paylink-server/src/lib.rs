pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod gate;
pub mod grant;
pub mod ledger;
pub mod metrics;
pub mod policy;
pub mod requests;
pub mod routes;
pub mod short_id;
pub mod state;
pub mod validation;
pub mod webhook;

pub use config::ServerConfig;
pub use db::Database;
pub use error::ServerError;
pub use state::AppState;
