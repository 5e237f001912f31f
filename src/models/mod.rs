pub mod circuit;
pub mod module;
pub mod risk;
pub mod signal;
pub mod state;
