pub mod api_router;
pub mod billing;
pub mod config;
pub mod lifecycle;
pub mod matching;
pub mod notifications;
pub mod shared;
pub mod signature;
pub mod sweeps;
