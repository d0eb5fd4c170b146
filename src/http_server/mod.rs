pub mod app;
pub mod callback;
pub mod error;
pub mod state;
