//! Method trait and type definitions for attaching associated types to RPC
//! methods.

use serde_json::Value;

/// A JSON RPC method.
pub trait Method {
    type Params;
    type Result;

    fn into_name(self) -> String;
}

impl Method for String {
    type Params = Vec<Value>;
    type Result = Value;

    fn into_name(self) -> String {
        self
    }
}

impl Method for &'_ str {
    type Params = <String as Method>::Params;
    type Result = <String as Method>::Result;

    fn into_name(self) -> String {
        self.to_owned()
    }
}

macro_rules! impl_method {
    ($(
        $(#[$attr:meta])*
        pub struct $m:ident = $s:literal ($($p:ty),*) -> $r:ty;
    )*) => {$(
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $m;

        impl $crate::node::method::Method for $m {
            type Params = ($($p,)*);
            type Result = $r;

            fn into_name(self) -> String {
                $s.to_owned()
            }
        }
    )*};
}

pub mod eth {
    use crate::node::types::Block;
    use alloy_primitives::{Address, Bytes, B256, U128, U64};
    use serde_json::Value;

    impl_method! {
        /// Returns the chain ID of the remote node.
        pub struct ChainId = "eth_chainId" () -> U64;

        /// Returns the number of transactions sent from an account.
        pub struct GetTransactionCount = "eth_getTransactionCount" (Address, Block) -> U64;

        /// Estimates the gas limit for a transaction.
        pub struct EstimateGas = "eth_estimateGas" (Value, Block) -> U64;

        /// Returns the current gas price.
        pub struct GasPrice = "eth_gasPrice" () -> U128;

        /// Returns a suggested priority fee.
        pub struct MaxPriorityFeePerGas = "eth_maxPriorityFeePerGas" () -> U128;

        /// Submits a signed transaction to the network.
        pub struct SendRawTransaction = "eth_sendRawTransaction" (Bytes) -> B256;
    }
}

/// Methods exposed by the hardware device bridge. Every method takes the
/// device identifier and the derivation path as its first two parameters.
pub mod ledger {
    use alloy_primitives::{Address, Bytes, B256};

    impl_method! {
        /// Derives the address for a derivation path on the device.
        pub struct DeriveAddress = "ledger_deriveAddress" (String, String) -> Address;

        /// Signs the RLP encoded signing payload of a transaction.
        pub struct SignTransaction = "ledger_signTransaction" (String, String, Bytes) -> Bytes;

        /// Signs EIP-712 typed data given as a domain separator and struct
        /// hash.
        pub struct SignEip712HashedMessage =
            "ledger_signEip712HashedMessage" (String, String, B256, B256) -> Bytes;

        /// Signs a message with the EIP-191 personal message prefix.
        pub struct SignPersonalMessage = "ledger_signPersonalMessage" (String, String, Bytes) -> Bytes;
    }
}
