pub mod configuration;
pub mod upgrade;
