mod admin;
mod health;
mod pages;

pub use admin::clear_cache;
pub use health::{health_check, stats};
pub use pages::{api_info, index, not_found, robots_txt};
