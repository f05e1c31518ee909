pub mod delivery;
pub mod job;
pub mod preferences;

pub use delivery::{transition, DeliveryRecord, DeliveryStatus, InvalidTransition};
pub use job::{Channel, DeliveryJob, TemplateReference};
pub use preferences::UserPreferenceSnapshot;
