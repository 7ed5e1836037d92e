pub mod env;
pub mod formats;
pub mod settings;
