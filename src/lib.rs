pub mod aircraft;
pub mod community;
pub mod config;
pub mod fallback;
pub mod geo;
pub mod heuristics;
pub mod identify;
pub mod logging;
pub mod model;
pub mod poller;
pub mod registry;
pub mod session;
pub mod state;
pub mod status;
pub mod update;
