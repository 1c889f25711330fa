pub mod api;
pub mod session;
pub mod state;

pub use api::{AdCraftApiClient, ClientError};
pub use session::AdCraftSession;
pub use state::{transition, ClientEvent, ClientViewState, Phase};
