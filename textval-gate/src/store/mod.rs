//! Persistence backends for entitlement records and voice profiles.
//!
//! Both backends implement [`EntitlementStore`](crate::entitlement::EntitlementStore)
//! and [`VoiceProfileStore`](crate::voice::VoiceProfileStore).

mod memory;
mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;
