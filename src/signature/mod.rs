pub mod clicksign;
pub mod webhook;
