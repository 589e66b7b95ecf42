//! Bridge services — payload classification, decryption trials, shared
//! state, and the browser-facing protocol.

pub mod classify;
pub mod keyring;
pub mod protocol;
pub mod subscriptions;
pub mod trial;

pub use classify::{classify, Classification, ContentKind};
pub use keyring::KeyRing;
pub use subscriptions::SubscriptionSet;
pub use trial::{decrypt_packet, Candidate, DecryptStatus, TrialOutcome};
