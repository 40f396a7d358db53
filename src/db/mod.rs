pub mod alerts;
pub mod history;
pub mod models;
pub mod subscriptions;
pub mod users;
