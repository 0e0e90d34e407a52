use serde::{Deserialize, Serialize};
use thiserror::Error;
use unilink_primitives::Buf32;

/// Inbound transfer kind, as encoded by the gateway contract.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Gas,
    GasAndPayload,
    Funds,
    FundsAndPayload,
    Unspecified,
}

impl TxType {
    /// Maps the wire code (0..3); anything else is `Unspecified`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Gas,
            1 => Self::GasAndPayload,
            2 => Self::Funds,
            3 => Self::FundsAndPayload,
            _ => Self::Unspecified,
        }
    }

    /// Whether the transfer carries a universal payload to execute.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Self::GasAndPayload | Self::FundsAndPayload)
    }

    /// Whether the transfer credits an explicit recipient.
    pub fn carries_recipient(&self) -> bool {
        matches!(self, Self::Gas | Self::Funds)
    }
}

/// Error deserializing or validating a gateway event payload.
#[derive(Debug, Error)]
pub enum GatewayPayloadError {
    #[error("malformed gateway payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gateway payload is not a JSON object")]
    NotAnObject,

    #[error("gateway payload missing required field `{0}`")]
    MissingField(&'static str),
}

/// An inbound gateway log as emitted by the external chain's gateway
/// contract.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundGatewayEvent {
    pub source_chain: String,
    pub log_index: u64,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub bridge_token: String,
    /// uint256 as a decimal string.
    pub bridge_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_fund_recipient: Option<String>,
    /// Hex-encoded revert message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_msg: Option<String>,
    pub tx_type: u8,
}

/// An outbound settlement receipt observed on the destination chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundGatewayEvent {
    pub tx_id: Buf32,
    pub universal_tx_id: Buf32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

/// Tagged decoding of the opaque event payload bytes.
///
/// Unknown fields are ignored; missing required fields are a validation
/// error, not a parse panic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GatewayEventPayload {
    Inbound(InboundGatewayEvent),
    Outbound(OutboundGatewayEvent),
}

impl GatewayEventPayload {
    /// Decodes payload bytes, dispatching on the presence of the outbound
    /// identifier pair.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GatewayPayloadError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let obj = value.as_object().ok_or(GatewayPayloadError::NotAnObject)?;

        if obj.contains_key("tx_id") || obj.contains_key("universal_tx_id") {
            if !obj.contains_key("tx_id") {
                return Err(GatewayPayloadError::MissingField("tx_id"));
            }
            if !obj.contains_key("universal_tx_id") {
                return Err(GatewayPayloadError::MissingField("universal_tx_id"));
            }
            let outbound = serde_json::from_value(value)?;
            return Ok(Self::Outbound(outbound));
        }

        let inbound = serde_json::from_value(value)?;
        Ok(Self::Inbound(inbound))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, GatewayPayloadError> {
        let bytes = match self {
            Self::Inbound(ev) => serde_json::to_vec(ev)?,
            Self::Outbound(ev) => serde_json::to_vec(ev)?,
        };
        Ok(bytes)
    }
}
