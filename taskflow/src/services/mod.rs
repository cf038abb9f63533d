//! Services module
//!
//! State containers and the helpers they coordinate with.

pub mod analytics;
pub mod denormalize;
pub mod events;
pub mod export;
pub mod fallback;
pub mod identity;
pub mod preferences;
pub mod retry;
pub mod work_items;

pub use events::{SessionEvent, SessionEvents};
pub use identity::{IdentityService, IdentityState};
pub use preferences::PreferencesService;
pub use work_items::{WorkItemsService, WorkItemsState};
