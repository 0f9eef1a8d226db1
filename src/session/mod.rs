pub mod state;
pub mod store;

pub use state::ChartSession;
pub use store::SessionStore;
