//! Event routing: priority -> notifiers, with bounded retries per notifier.
//!
//! ```text
//!  OrchestratorEvent
//!        │ priority
//!        ▼
//!   RoutingConfig ──► [notifier names]
//!        │ fan-out (join_all)
//!   ┌────┴─────┬──────────┐
//!   ▼          ▼          ▼
//!  deliver    deliver    deliver      (retry, linear backoff, optional throttle)
//!   │          │          │
//!   └────┬─────┴──────────┘
//!        ▼
//!  Vec<DeliveryOutcome>
//! ```

pub mod router;

pub use router::{DeliveryOutcome, EventRouter};
