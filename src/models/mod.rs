mod post;
mod settings;
mod subscription;

pub use post::{NewPost, Post, PushStatus, StatusUpdate};
pub use settings::{SettingsSnapshot, SettingsUpdate};
pub use subscription::{NewSubscription, Subscription};
