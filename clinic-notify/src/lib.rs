pub mod telegram;

pub use telegram::{Notifier, TelegramChat, TelegramMessage, TelegramUpdate};
