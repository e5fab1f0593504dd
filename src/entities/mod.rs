//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod batch;
pub mod checkout_intent;
pub mod enrollment;
pub mod notification_event;
pub mod offering;
pub mod payment_reconciliation;
pub mod schedule_plan;
pub mod schedule_slot;
pub mod session_instance;
pub mod spending_limit;

// Re-export specific types to avoid conflicts
pub use batch::{Column as BatchColumn, Entity as Batch, Model as BatchModel};
pub use checkout_intent::{
    Column as CheckoutIntentColumn, Entity as CheckoutIntent, Model as CheckoutIntentModel,
};
pub use enrollment::{Column as EnrollmentColumn, Entity as Enrollment, Model as EnrollmentModel};
pub use notification_event::{
    Column as NotificationEventColumn, Entity as NotificationEvent,
    Model as NotificationEventModel,
};
pub use offering::{Column as OfferingColumn, Entity as Offering, Model as OfferingModel};
pub use payment_reconciliation::{
    Column as PaymentReconciliationColumn, Entity as PaymentReconciliation,
    Model as PaymentReconciliationModel,
};
pub use schedule_plan::{
    Column as SchedulePlanColumn, Entity as SchedulePlan, Model as SchedulePlanModel,
};
pub use schedule_slot::{
    Column as ScheduleSlotColumn, Entity as ScheduleSlot, Model as ScheduleSlotModel,
};
pub use session_instance::{
    Column as SessionInstanceColumn, Entity as SessionInstance, Model as SessionInstanceModel,
};
pub use spending_limit::{
    Column as SpendingLimitColumn, Entity as SpendingLimit, Model as SpendingLimitModel,
};
