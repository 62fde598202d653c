pub mod config;
pub mod inspect;
pub mod record;
pub mod script;
