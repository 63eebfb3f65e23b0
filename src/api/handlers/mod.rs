pub mod configuration;
pub mod health;
pub mod upgrade;
