use std::fmt;

/// Error taxonomy for the bridge core.
///
/// Registry and session errors are synchronous return values that the caller surfaces
/// to the operator. Link errors are observed and logged, never escalated. Everything
/// converts into `anyhow::Error` at binary boundaries.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeError {
    /// A tracker with this id is already registered.
    DuplicateId { id: String },
    /// Activation refused: `with` is active and owns some of the same markers.
    MarkerConflict {
        id: String,
        with: String,
        markers: Vec<i32>,
    },
    UnknownTracker { id: String },
    InvalidDefinition { id: String, reason: String },
    /// Network I/O failure on a best-effort send.
    LinkSendFailure { packet: &'static str, reason: String },
    NotConnected,
    /// All positive int8 network ids have been handed out in this link session.
    NetworkIdsExhausted,
    /// Camera or vision collaborator could not be initialised.
    DeviceUnavailable { device: String, reason: String },
    DegenerateRotation { w: f64, x: f64, y: f64, z: f64 },
    NotEnoughSamples { have: usize, need: usize },
    ModeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl BridgeError {
    /// Stable machine-readable code, used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::DuplicateId { .. } => "DUPLICATE_ID",
            BridgeError::MarkerConflict { .. } => "MARKER_CONFLICT",
            BridgeError::UnknownTracker { .. } => "UNKNOWN_TRACKER",
            BridgeError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            BridgeError::LinkSendFailure { .. } => "LINK_SEND_FAILURE",
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::NetworkIdsExhausted => "NETWORK_IDS_EXHAUSTED",
            BridgeError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            BridgeError::DegenerateRotation { .. } => "DEGENERATE_ROTATION",
            BridgeError::NotEnoughSamples { .. } => "NOT_ENOUGH_SAMPLES",
            BridgeError::ModeMismatch { .. } => "MODE_MISMATCH",
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.code())?;
        match self {
            BridgeError::DuplicateId { id } => write!(f, "tracker '{}' already registered", id),
            BridgeError::MarkerConflict { id, with, markers } => write!(
                f,
                "tracker '{}' shares markers {:?} with active tracker '{}'",
                id, markers, with
            ),
            BridgeError::UnknownTracker { id } => write!(f, "no tracker named '{}'", id),
            BridgeError::InvalidDefinition { id, reason } => {
                write!(f, "tracker '{}' is invalid: {}", id, reason)
            }
            BridgeError::LinkSendFailure { packet, reason } => {
                write!(f, "failed to send {} packet: {}", packet, reason)
            }
            BridgeError::NotConnected => write!(f, "link is not connected"),
            BridgeError::NetworkIdsExhausted => {
                write!(f, "no network ids left in this link session")
            }
            BridgeError::DeviceUnavailable { device, reason } => {
                write!(f, "device {} unavailable: {}", device, reason)
            }
            BridgeError::DegenerateRotation { w, x, y, z } => write!(
                f,
                "quaternion ({}, {}, {}, {}) has no defined rotation axis",
                w, x, y, z
            ),
            BridgeError::NotEnoughSamples { have, need } => write!(
                f,
                "{} board samples captured, {} required for calibration",
                have, need
            ),
            BridgeError::ModeMismatch { expected, actual } => write!(
                f,
                "operation requires {} mode, session is in {} mode",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for BridgeError {}
