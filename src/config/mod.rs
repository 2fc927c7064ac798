pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from, EnvSource};
pub use schema::{QueueMode, WorkerConfig};
pub use validation::validate_chrome_path;
