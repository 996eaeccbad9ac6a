pub mod models;
pub mod sensor;
pub mod settings;
