pub mod errors;
pub mod events;
pub mod models;
pub mod presets;
pub mod session;
