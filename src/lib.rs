pub mod application_path_gen;
pub mod configuration;
pub mod db;
pub mod error_result;
pub mod lock;
pub mod scheduler;
pub mod server;
pub mod services;
pub mod telemetry;
