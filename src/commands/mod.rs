pub mod alerts;
pub mod feed;
pub mod health;
pub mod history;
pub mod notifications;
