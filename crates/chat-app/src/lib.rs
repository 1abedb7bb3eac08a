pub mod chat;
pub mod controller;
pub mod error;
pub mod location;
pub mod settings;

pub use controller::{ChatTurnState, ModeController, SubmitRejection};
pub use error::{AppError, AppResult};
pub use settings::Settings;
