pub mod feed;
pub mod history;
pub mod persistence;
pub mod price;
pub mod pusher;
pub mod types;

pub const PRICE_UPDATE_EVENT: &str = "price_update";
pub const FEED_STATUS_EVENT: &str = "feed_status";
