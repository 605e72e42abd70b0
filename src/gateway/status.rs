//! Mapping from gateway status vocabulary to transaction lifecycle states.

use crate::gateway::types::TxnStatus;

/// Map the gateway's status string (and numeric code, when present) onto our
/// lifecycle. Pure function of its inputs.
///
/// Anything unrecognised maps to `Failed`: an unknown gateway answer must
/// never move money or leave a transaction looking successful.
pub fn map_gateway_status(status: &str, status_code: Option<&str>) -> TxnStatus {
    let normalized = status.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "SUCCESS" | "SUCCESSFUL" | "PAID" | "TXN_SUCCESS" => TxnStatus::Success,
        "PENDING" | "IN_PROCESS" | "IN-PROCESS" | "PROCESSING" | "TXN_PENDING" => {
            TxnStatus::Pending
        }
        "INITIATED" | "NOT_ATTEMPTED" => TxnStatus::Initiated,
        "ABORTED" | "CANCELLED" | "USER_ABORTED" => TxnStatus::Aborted,
        "FAILED" | "FAILURE" | "TXN_FAILURE" | "DECLINED" => TxnStatus::Failed,
        _ => map_status_code(status_code),
    }
}

// Older gateway responses carry only the numeric code.
fn map_status_code(status_code: Option<&str>) -> TxnStatus {
    match status_code.map(str::trim) {
        Some("0000") => TxnStatus::Success,
        Some("0100") => TxnStatus::Pending,
        Some("0200") => TxnStatus::Aborted,
        Some("0300") => TxnStatus::Failed,
        _ => TxnStatus::Failed,
    }
}
