//! Domain model (ids, messages, envelopes, errors, decisions, schedules).

pub mod cron;
pub mod decision;
pub mod dispatch;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod message;
pub mod schedule;
pub mod state;

pub use self::cron::{
    CronError, CronExpression, CronSchedule, parse_cron_expression, parse_cron_expression_at,
};
pub use self::decision::{RetryDecision, RetryManager};
pub use self::dispatch::{DispatchOptions, DispatchResult};
pub use self::envelope::{EnvelopeMetadata, MessageEnvelope};
pub use self::errors::{CourierError, ErrorKind, HandlerError, TransportError};
pub use self::ids::{MessageId, ScheduleId};
pub use self::message::{Message, Priority};
pub use self::schedule::{Schedule, ScheduleConfig};
pub use self::state::WorkerState;
