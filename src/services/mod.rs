mod delivery;
mod telegram;

pub use delivery::DeliverySink;
pub use telegram::{MessageSender, SenderFactory, TelegramSenderFactory};
