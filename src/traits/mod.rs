mod channel;
mod provider;
mod store;

pub use channel::Channel;
pub use provider::ModelProvider;
pub use store::{
    CheckinStore, DataStore, GoalStore, LedgerStore, MessageStore, ProfileStore, SessionStore,
    TaskStore, TransactionStore,
};
