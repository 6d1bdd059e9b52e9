//! Service modules
//!
//! Business logic consumed by route handlers: the Fingerprint Catalogue,
//! Challenge Index, Attestation Verifier, Pinning Store, Alert Dispatcher,
//! Maintenance Loop, and Account/Session collaborator.

pub mod accounts;
pub mod alert_dispatcher;
pub mod attestation_verifier;
pub mod catalogue;
pub mod challenge_store;
pub mod mailer;
pub mod maintenance;
pub mod pinning_store;
pub mod vendor_roots;

pub use attestation_verifier::{AttestationReport, VerifierError};
pub use catalogue::DeviceIdentity;
pub use challenge_store::ChallengeStore;
pub use mailer::{MailError, Mailer, SmtpMailer};
pub use pinning_store::Outcome;
