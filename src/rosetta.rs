//! Rosetta 1.4.x wire model.
//!
//! Only the subset of the Rosetta API this service serves. Optional fields
//! are skipped when absent so responses stay minimal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROSETTA_VERSION: &str = "1.4.0";

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct NetworkIdentifier {
    pub blockchain: String,
    pub network: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct BlockIdentifier {
    pub index: i64,
    pub hash: String,
}

#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct PartialBlockIdentifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TransactionIdentifier {
    pub hash: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct AccountIdentifier {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AccountIdentifier {
    pub fn new(address: impl Into<String>) -> Self {
        AccountIdentifier {
            address: address.into(),
            metadata: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Currency {
    pub symbol: String,
    pub decimals: u32,
}

/// The one currency this service deals in.
pub fn dcr_currency() -> Currency {
    Currency {
        symbol: "DCR".into(),
        decimals: 8,
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Amount {
    pub value: String,
    pub currency: Currency,
}

impl Amount {
    /// Render an atom amount with the fixed currency descriptor.
    pub fn dcr(atoms: i64) -> Self {
        Amount {
            value: atoms.to_string(),
            currency: dcr_currency(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct OperationIdentifier {
    pub index: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoinAction {
    #[serde(rename = "coin_spent")]
    Spent,
    #[serde(rename = "coin_created")]
    Created,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct CoinIdentifier {
    pub identifier: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct CoinChange {
    pub coin_identifier: CoinIdentifier,
    pub coin_action: CoinAction,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Operation {
    pub operation_identifier: OperationIdentifier,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub account: AccountIdentifier,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_change: Option<CoinChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Transaction {
    pub transaction_identifier: TransactionIdentifier,
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Block {
    pub block_identifier: BlockIdentifier,
    pub parent_block_identifier: BlockIdentifier,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

// --- /network

#[derive(Deserialize, Debug)]
pub struct MetadataRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct NetworkRequest {
    pub network_identifier: NetworkIdentifier,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct NetworkListResponse {
    pub network_identifiers: Vec<NetworkIdentifier>,
}

#[derive(Serialize, Debug)]
pub struct Version {
    pub rosetta_version: String,
    pub node_version: String,
    pub middleware_version: String,
}

#[derive(Serialize, Debug)]
pub struct OperationStatus {
    pub status: String,
    pub successful: bool,
}

#[derive(Serialize, Debug)]
pub struct Allow {
    pub operation_statuses: Vec<OperationStatus>,
    pub operation_types: Vec<String>,
    pub errors: Vec<ErrorObject>,
    pub historical_balance_lookup: bool,
}

#[derive(Serialize, Debug)]
pub struct NetworkOptionsResponse {
    pub version: Version,
    pub allow: Allow,
}

#[derive(Serialize, Debug)]
pub struct NetworkStatusResponse {
    pub current_block_identifier: BlockIdentifier,
    pub current_block_timestamp: i64,
    pub genesis_block_identifier: BlockIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,
    pub peers: Vec<Peer>,
}

#[derive(Serialize, Debug)]
pub struct SyncStatus {
    pub current_index: i64,
    pub target_index: i64,
    pub synced: bool,
}

#[derive(Serialize, Debug)]
pub struct Peer {
    pub peer_id: String,
}

// --- /block

#[derive(Deserialize, Debug)]
pub struct BlockRequest {
    pub network_identifier: NetworkIdentifier,
    pub block_identifier: PartialBlockIdentifier,
}

#[derive(Serialize, Debug)]
pub struct BlockResponse {
    pub block: Block,
}

#[derive(Deserialize, Debug)]
pub struct BlockTransactionRequest {
    pub network_identifier: NetworkIdentifier,
    pub block_identifier: BlockIdentifier,
    pub transaction_identifier: TransactionIdentifier,
}

#[derive(Serialize, Debug)]
pub struct BlockTransactionResponse {
    pub transaction: Transaction,
}

// --- /mempool

#[derive(Serialize, Debug)]
pub struct MempoolResponse {
    pub transaction_identifiers: Vec<TransactionIdentifier>,
}

#[derive(Deserialize, Debug)]
pub struct MempoolTransactionRequest {
    pub network_identifier: NetworkIdentifier,
    pub transaction_identifier: TransactionIdentifier,
}

#[derive(Serialize, Debug)]
pub struct MempoolTransactionResponse {
    pub transaction: Transaction,
}

// --- /account

#[derive(Deserialize, Debug)]
pub struct AccountBalanceRequest {
    pub network_identifier: NetworkIdentifier,
    pub account_identifier: AccountIdentifier,
    #[serde(default)]
    pub block_identifier: Option<PartialBlockIdentifier>,
}

#[derive(Serialize, Debug)]
pub struct AccountBalanceResponse {
    pub block_identifier: BlockIdentifier,
    pub balances: Vec<Amount>,
}

// --- /construction

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum CurveType {
    Secp256k1,
    Secp256r1,
    Edwards25519,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Ecdsa,
    EcdsaRecovery,
    Ed25519,
    Schnorr1,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PublicKey {
    pub hex_bytes: String,
    pub curve_type: CurveType,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionDeriveRequest {
    pub network_identifier: NetworkIdentifier,
    pub public_key: PublicKey,
}

#[derive(Serialize, Debug)]
pub struct ConstructionDeriveResponse {
    pub account_identifier: AccountIdentifier,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionPreprocessRequest {
    pub network_identifier: NetworkIdentifier,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ConstructionPreprocessResponse {
    pub options: Value,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionMetadataRequest {
    pub network_identifier: NetworkIdentifier,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ConstructionMetadataResponse {
    pub metadata: Value,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct SigningPayload {
    pub account_identifier: AccountIdentifier,
    pub hex_bytes: String,
    pub signature_type: SignatureType,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionPayloadsRequest {
    pub network_identifier: NetworkIdentifier,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ConstructionPayloadsResponse {
    pub unsigned_transaction: String,
    pub payloads: Vec<SigningPayload>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Signature {
    pub public_key: PublicKey,
    pub signature_type: SignatureType,
    pub hex_bytes: String,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionCombineRequest {
    pub network_identifier: NetworkIdentifier,
    pub unsigned_transaction: String,
    pub signatures: Vec<Signature>,
}

#[derive(Serialize, Debug)]
pub struct ConstructionCombineResponse {
    pub signed_transaction: String,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionHashRequest {
    pub network_identifier: NetworkIdentifier,
    pub signed_transaction: String,
}

#[derive(Deserialize, Debug)]
pub struct ConstructionSubmitRequest {
    pub network_identifier: NetworkIdentifier,
    pub signed_transaction: String,
}

#[derive(Serialize, Debug)]
pub struct TransactionIdentifierResponse {
    pub transaction_identifier: TransactionIdentifier,
}

// --- errors

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
