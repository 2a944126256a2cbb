pub mod vindi;
pub mod webhook;
