pub mod dispatcher;
pub mod jobs;

pub use dispatcher::{build, Dispatcher, JobHandler, Scheduler};
pub use jobs::{
    auto_miss_key, next_fire, reminder_key, AutoMissPayload, JobKind, ReminderFirePayload,
    PERIODIC_KEY,
};
