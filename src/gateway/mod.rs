pub mod grants;
pub mod server;

pub use server::{build_router, shutdown_signal, ApiServer, AppState};
