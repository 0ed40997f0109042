//! Storage collaborators
//!
//! [`traits`] describes what the assistant needs from persistence;
//! [`memory::MemoryStore`] is the bundled implementation, used by the CLI
//! and by tests.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{
    BookingOutcome, ClinicStore, ConversationStore, Store, SummaryStore, ToolLog, Visit,
    VisitRequest,
};
