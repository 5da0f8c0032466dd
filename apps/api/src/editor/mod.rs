// Live editor buffer and the animated field-edit path.

pub mod animation;
pub mod buffer;
pub mod executor;

pub use animation::AnimationOptions;
pub use buffer::{TextBuffer, ViewEvent};
pub use executor::{EditError, EditExecutor, EditSuccess};
