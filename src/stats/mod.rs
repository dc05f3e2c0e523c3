mod aggregate;
mod members;
mod registry;

pub use aggregate::{
    Aggregator, CATEGORY, CallInfo, DEMO_CALLS, DEMO_REQUESTS, EXISTING_CLOSED, NEW_CLOSED,
    NEW_OPEN, OVERALL_TOTAL, SALES_CALLS, SESSIONS, Summary, TOTAL_CLOSED, TOTAL_NON_PINGS,
    TOTAL_OPEN, TOTAL_PINGS, Tally, USER_INQUIRIES, VOICEMAILS, apply_cutoff,
};
pub use members::{Admin, Member, Roster};
pub use registry::{Stat, StatRegistry, StatValue};
