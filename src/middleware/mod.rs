mod cron_auth;
mod user_auth;

pub use cron_auth::*;
pub use user_auth::*;
