mod connected_state;
mod connecting_state;
mod disconnected_state;
mod disconnecting_state;
mod error_state;

pub use connected_state::ConnectedState;
pub use connecting_state::ConnectingState;
pub use disconnected_state::DisconnectedState;
pub use disconnecting_state::DisconnectingState;
pub use error_state::ErrorState;
