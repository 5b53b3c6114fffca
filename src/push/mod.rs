//! Web Push notifications
//!
//! - [`subscription`]: client-registered channels and selection filters
//! - [`store`]: subscription persistence
//! - [`payload`]: notification content
//! - [`crypto`] / [`vapid`]: message encryption and server identification
//! - [`sender`]: single-subscription delivery
//! - [`dispatcher`]: fan-out with pruning of gone subscriptions

pub mod crypto;
pub mod dispatcher;
pub mod payload;
pub mod sender;
pub mod store;
pub mod subscription;
pub mod vapid;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use payload::PushPayload;
pub use sender::{DeliveryOutcome, PushSender, WebPushSender};
pub use store::{FileSubscriptionStore, InMemorySubscriptionStore, SubscriptionStore};
pub use subscription::{PushSubscription, SubscriptionFilter, SubscriptionKeys};
pub use vapid::VapidKeys;
