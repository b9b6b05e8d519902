//! sea-orm entities backing the CRM store.
//!
//! Id and tag arrays live in JSON columns so a deal or contact can be
//! updated as a single row.

pub mod app_user;
pub mod contact;
pub mod deal;
pub mod dynamic_list;
pub mod pipeline_stage;
pub mod tag;
pub mod task;

pub mod prelude {
    pub use super::app_user::Entity as AppUser;
    pub use super::contact::Entity as Contact;
    pub use super::deal::Entity as Deal;
    pub use super::dynamic_list::Entity as DynamicList;
    pub use super::pipeline_stage::Entity as PipelineStage;
    pub use super::tag::Entity as Tag;
    pub use super::task::Entity as Task;
}
