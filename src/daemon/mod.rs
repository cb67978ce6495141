// =============================================================================
// QSO Daemon - State Machine for the Automated Operating Cycle
// =============================================================================
//
// Tracks the lifecycle of each contact from the status feed and keeps the
// controlled application transmitting:
//
//   Event                    | Action
//   -------------------------|-----------------------------------------------
//   <owncall> <partner>      | QSO opened (or partner change / continuation)
//   <owncall> ... 73/RR73    | QSO finished -> post-QSO quiet window, TX back on
//   hourly break due         | after the next finish: long randomized pause,
//                            | CQ re-armed, TX re-enabled, epoch reset
//   QSO stalls past ceiling  | CQ/TX restart sequence, QSO dropped
//   TX observed off          | enforcement watchdog re-arms it
//
// All state lives in one SystemState behind a single lock. The receive loop,
// the three watchdogs and the publisher are independent workers serializing
// through that lock; timed sequences run in spawned workers so the receive
// loop is never held up by a settle delay.

mod machine;
mod state;
pub mod watchdog;

pub use machine::AutoQso;
pub use state::{
    BreakArm, Countdown, QsoStart, StatusSnapshot, SystemState, MESSAGE_LOG_CAPACITY,
};
