use alloy::{rpc::types::Log, sol, sol_types::SolEvent};
use tracing::warn;
use unilink_primitives::{Buf32, ChainRef};
use unilink_types::{
    ConfirmationSpeed, EventKind, GatewayEventPayload, InboundGatewayEvent, OutboundGatewayEvent,
    TxType,
};

use crate::{errors::ChainError, observation::GatewayObservation};

sol! {
    /// Inbound transfer into the universal chain.
    event FundsAdded(
        address indexed sender,
        address recipient,
        address token,
        uint256 amount,
        uint8 txType,
        bytes universalPayload,
        bytes verificationData
    );

    /// Settlement receipt for an outbound executed on this chain.
    event OutboundSettled(
        bytes32 txId,
        bytes32 universalTxId,
        string errorMsg
    );
}

/// Gateway method names as used in tracked-tx bookkeeping.
pub(crate) const METHOD_ADD_FUNDS: &str = "addFunds";
pub(crate) const METHOD_SETTLE: &str = "settle";

fn hex_bytes(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| format!("0x{}", hex::encode(bytes)))
}

/// Decodes one gateway log into an observation.
///
/// Logs with unknown topics return `None`; malformed known logs are a
/// decode error the caller skips with a warning.
pub(crate) fn decode_gateway_log(
    chain: &ChainRef,
    log: &Log,
) -> Result<Option<GatewayObservation>, ChainError> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::Decode("log without transaction hash".into()))?;
    let tx_hash = format!("{tx_hash:#x}");
    let log_index = log
        .log_index
        .ok_or_else(|| ChainError::Decode("log without index".into()))?;
    let block_height = log
        .block_number
        .ok_or_else(|| ChainError::Decode("log without block number".into()))?;
    let event_id = format!("{tx_hash}:{log_index}");

    if log.topic0() == Some(&FundsAdded::SIGNATURE_HASH) {
        let decoded = FundsAdded::decode_log(&log.inner).map_err(ChainError::decode)?;
        let tx_type = decoded.txType;

        let wire = InboundGatewayEvent {
            source_chain: chain.to_string(),
            log_index,
            sender: format!("{:#x}", decoded.sender),
            recipient: Some(format!("{:#x}", decoded.recipient)),
            bridge_token: format!("{:#x}", decoded.token),
            bridge_amount: decoded.amount.to_string(),
            universal_payload: hex_bytes(&decoded.universalPayload),
            verification_data: hex_bytes(&decoded.verificationData),
            revert_fund_recipient: None,
            revert_msg: None,
            tx_type,
        };
        let payload = GatewayEventPayload::Inbound(wire)
            .to_json()
            .map_err(ChainError::decode)?;

        // gas-only transfers ride the fast confirmation lane
        let confirmation = if TxType::from_code(tx_type) == TxType::Gas {
            ConfirmationSpeed::Fast
        } else {
            ConfirmationSpeed::Standard
        };

        return Ok(Some(GatewayObservation {
            event_id,
            kind: EventKind::Inbound,
            tx_hash,
            block_height,
            method: METHOD_ADD_FUNDS.to_owned(),
            confirmation,
            payload,
        }));
    }

    if log.topic0() == Some(&OutboundSettled::SIGNATURE_HASH) {
        let decoded = OutboundSettled::decode_log(&log.inner).map_err(ChainError::decode)?;

        let wire = OutboundGatewayEvent {
            tx_id: Buf32::new(decoded.txId.0),
            universal_tx_id: Buf32::new(decoded.universalTxId.0),
            error_msg: (!decoded.errorMsg.is_empty()).then(|| decoded.errorMsg.clone()),
        };
        let payload = GatewayEventPayload::Outbound(wire)
            .to_json()
            .map_err(ChainError::decode)?;

        return Ok(Some(GatewayObservation {
            event_id,
            kind: EventKind::Outbound,
            tx_hash,
            block_height,
            method: METHOD_SETTLE.to_owned(),
            confirmation: ConfirmationSpeed::Standard,
            payload,
        }));
    }

    warn!(topic = ?log.topic0(), "skipping unknown gateway log");
    Ok(None)
}
