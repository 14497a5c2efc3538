//! Events carried on the internal bus.
//!
//! The change worker emits `ExchangeChange`, `HeartbeatStateChange`, and
//! `NodeShutdown`; the rest are produced by peer workers and consumed here.

use moorline_core::ChangeKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Failed,
    Restored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeShutdownReason {
    /// The node entry is gone from the Exchange; a full quiesce must begin.
    StartUnconfigure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelationReason {
    AgreementEnded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    MessageStop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    UnconfigureComplete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Resources of `kind` moved upstream; downstream workers should re-read
    /// exactly those.
    ExchangeChange { kind: ChangeKind },
    HeartbeatStateChange {
        status: HeartbeatStatus,
        org: String,
        id: String,
    },
    NodeShutdown { reason: NodeShutdownReason },

    /// The node obtained `(org, id, token)` from the Exchange.
    DeviceRegistered {
        org: String,
        id: String,
        token: String,
    },
    AgreementReached,
    NodePolicyChanged,
    NodeUserInputChanged,
    WorkloadCancelation { reason: CancelationReason },
    AgreementCancelation { reason: CancelationReason },
    ChangesShutdown { reason: StopReason },
    NodeShutdownComplete { reason: CompletionReason },
}
