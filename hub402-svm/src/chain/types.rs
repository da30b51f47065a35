//! Core Solana chain types: addresses and network identities.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_pubkey::Pubkey;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Sentinel `asset` value selecting the network-native asset.
pub const NATIVE_ASSET: &str = "native";

/// A Solana account address, transported as base58.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Address(Pubkey);

/// The given string is not a valid base58 Solana address.
#[derive(Debug, thiserror::Error)]
#[error("invalid Solana address: {0}")]
pub struct AddressParseError(pub String);

impl Address {
    /// Wraps an already-validated public key.
    #[must_use]
    pub const fn new(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }

    /// Returns the underlying public key.
    #[must_use]
    pub const fn pubkey(&self) -> &Pubkey {
        &self.0
    }
}

impl From<Pubkey> for Address {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }
}

impl From<Address> for Pubkey {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pubkey = Pubkey::from_str(s).map_err(|_| AddressParseError(s.to_owned()))?;
        Ok(Self(pubkey))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The Solana clusters this facilitator can settle on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolanaNetwork {
    /// Development cluster with faucet support.
    Devnet,
    /// Test cluster.
    Testnet,
    /// Production cluster.
    Mainnet,
}

impl SolanaNetwork {
    /// The protocol-level network identifier carried in payment
    /// requirements and settlement receipts.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Devnet => "solana-devnet",
            Self::Testnet => "solana-testnet",
            Self::Mainnet => "solana",
        }
    }

    /// Public RPC endpoint used when no explicit URL is configured.
    #[must_use]
    pub const fn default_rpc_url(&self) -> &'static str {
        match self {
            Self::Devnet => "https://api.devnet.solana.com",
            Self::Testnet => "https://api.testnet.solana.com",
            Self::Mainnet => "https://api.mainnet-beta.solana.com",
        }
    }

    /// Whether the cluster exposes a faucet for auto-funding.
    #[must_use]
    pub const fn has_faucet(&self) -> bool {
        !matches!(self, Self::Mainnet)
    }
}

impl FromStr for SolanaNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" | "solana-devnet" => Ok(Self::Devnet),
            "testnet" | "solana-testnet" => Ok(Self::Testnet),
            "mainnet" | "mainnet-beta" | "solana" => Ok(Self::Mainnet),
            other => Err(format!(
                "unknown Solana network {other:?} (expected devnet, testnet or mainnet-beta)"
            )),
        }
    }
}

impl Display for SolanaNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_base58() {
        let pubkey = Pubkey::new_unique();
        let address: Address = pubkey.to_string().parse().unwrap();
        assert_eq!(address.pubkey(), &pubkey);
        assert_eq!(address.to_string(), pubkey.to_string());
    }

    #[test]
    fn address_rejects_garbage() {
        assert!("not-an-address".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn network_names() {
        assert_eq!("devnet".parse::<SolanaNetwork>().unwrap(), SolanaNetwork::Devnet);
        assert_eq!(
            "solana-devnet".parse::<SolanaNetwork>().unwrap().id(),
            "solana-devnet"
        );
        assert_eq!("mainnet-beta".parse::<SolanaNetwork>().unwrap(), SolanaNetwork::Mainnet);
        assert!("ethereum".parse::<SolanaNetwork>().is_err());
    }
}
