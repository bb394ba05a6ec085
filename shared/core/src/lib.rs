mod lr;
mod shuffle;
mod token_size;

pub use lr::LearningRateSchedule;
pub use shuffle::{deterministic_shuffle, Shuffle};
pub use token_size::TokenSize;
