use coffer_types::{Address, AssetAmount, Timestamp, Transaction, TransactionRequest};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationWarning {
    /// Gas fee plus value exceeds the sender's base-asset balance.
    InsufficientFunds,
    SendToContract,
    /// Token sent to the token contract itself.
    SendToToken,
    /// Allowance granted to an address without contract code.
    ApproveToEoa,
}

/// An address with whatever display metadata resolvers found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIdentity {
    pub address: Address,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl AddressIdentity {
    pub fn bare(address: Address) -> Self {
        Self {
            address,
            name: None,
            avatar: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnnotationKind {
    ContractDeployment,
    ContractInteraction {
        contract: AddressIdentity,
    },
    AssetTransfer {
        sender: AddressIdentity,
        recipient: AddressIdentity,
        asset_amount: AssetAmount,
    },
    AssetApproval {
        spender: AddressIdentity,
        asset_amount: AssetAmount,
    },
    AssetSwap {
        contract: AddressIdentity,
        sent: AssetAmount,
        received: AssetAmount,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAnnotation {
    #[serde(flatten)]
    pub kind: AnnotationKind,
    #[serde(default)]
    pub warnings: Vec<AnnotationWarning>,
    /// Asset transfers found in the transaction's logs.
    #[serde(default)]
    pub subannotations: Vec<TransactionAnnotation>,
    #[serde(default)]
    pub block_timestamp: Option<Timestamp>,
}

impl TransactionAnnotation {
    pub fn new(kind: AnnotationKind) -> Self {
        Self {
            kind,
            warnings: Vec::new(),
            subannotations: Vec::new(),
            block_timestamp: None,
        }
    }

    pub fn warn(&mut self, warning: AnnotationWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn has_warning(&self, warning: AnnotationWarning) -> bool {
        self.warnings.contains(&warning)
    }
}

/// A mined or observed transaction with its annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedTransaction {
    pub transaction: Transaction,
    pub annotation: TransactionAnnotation,
}

/// A request awaiting signature, with its annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedSignatureRequest {
    pub request: TransactionRequest,
    pub annotation: TransactionAnnotation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_types::{Asset, Network, U256};

    #[test]
    fn serialises_with_kebab_case_tags() {
        let mut annotation = TransactionAnnotation::new(AnnotationKind::AssetTransfer {
            sender: AddressIdentity::bare(Address::repeat_byte(1)),
            recipient: AddressIdentity::bare(Address::repeat_byte(2)),
            asset_amount: AssetAmount::new(Asset::base_of(&Network::ethereum()), U256::from(1u64)),
        });
        annotation.warn(AnnotationWarning::SendToContract);
        annotation.warn(AnnotationWarning::SendToContract);

        let value = serde_json::to_value(&annotation).unwrap();
        assert_eq!(value["type"], "asset-transfer");
        assert_eq!(value["warnings"], serde_json::json!(["send-to-contract"]));

        let back: TransactionAnnotation = serde_json::from_value(value).unwrap();
        assert_eq!(back, annotation);
    }
}
