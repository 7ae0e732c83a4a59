pub mod context;
pub mod traits;
pub mod tree;
pub mod typed_value;

// Re-export commonly used types
pub use context::ComponentContext;
pub use traits::{AsAny, Component, Container};
pub use tree::NAME_SEPARATOR;
pub use typed_value::{TypedValue, ValueStore};
