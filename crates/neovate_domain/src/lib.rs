mod actions;
pub use actions::Action;
mod effects;
pub use effects::Effect;
mod adapters;
pub use adapters::ClientServices;
pub mod paths;

mod persistence;
mod state;
pub use state::*;

mod reducer;
