#[macro_use]
extern crate tracing;

mod app;
pub mod bundle;
mod logging;

pub use app::App;
pub use logging::log_init;
