pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod sweep_task;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_app;
pub use state::AppState;
pub use sweep_task::start_sweep_task;
