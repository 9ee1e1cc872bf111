//! IVR phases

use serde::{Deserialize, Serialize};

/// Where a call session is in the menu tree.
///
/// Every collecting phase carries an attempts counter on the session; too
/// many failures escape to [`IvrPhase::Transfer`] rather than looping the
/// caller forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvrPhase {
    PinAuth,
    ProviderSelection,
    CollectJobCode,
    ConfirmJobCode,
    JobOptions,
    CollectReason,
    ConfirmLeaveOpen,
    CollectDay,
    CollectMonth,
    CollectTime,
    ConfirmDatetime,
    Transfer,
    Ended,
}

impl IvrPhase {
    /// Attempt cap before the failure escape fires.
    pub fn max_attempts(&self) -> u32 {
        match self {
            IvrPhase::PinAuth => 3,
            IvrPhase::ProviderSelection => 3,
            IvrPhase::CollectJobCode => 3,
            IvrPhase::ConfirmJobCode => 3,
            IvrPhase::JobOptions => 3,
            IvrPhase::CollectReason => 2,
            IvrPhase::ConfirmLeaveOpen => 3,
            IvrPhase::CollectDay | IvrPhase::CollectMonth | IvrPhase::CollectTime => 3,
            IvrPhase::ConfirmDatetime => 3,
            IvrPhase::Transfer | IvrPhase::Ended => 1,
        }
    }
}
