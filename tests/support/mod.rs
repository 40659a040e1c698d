pub mod handlers;
pub mod helpers;
