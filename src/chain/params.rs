use serde::Deserialize;

/// Static parameters of a Decred network deployment. Only the pieces the
/// Rosetta mapping needs: the network name reported in identifiers and the
/// two-byte address prefixes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainParams {
    pub name: &'static str,
    pub pubkey_hash_addr_id: [u8; 2],
    pub script_hash_addr_id: [u8; 2],
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
    Regnet,
}

impl Network {
    pub fn params(self) -> ChainParams {
        match self {
            Network::Mainnet => ChainParams {
                name: "mainnet",
                pubkey_hash_addr_id: [0x07, 0x3f],
                script_hash_addr_id: [0x07, 0x1a],
            },
            Network::Testnet => ChainParams {
                name: "testnet3",
                pubkey_hash_addr_id: [0x0f, 0x21],
                script_hash_addr_id: [0x0e, 0xfc],
            },
            Network::Simnet => ChainParams {
                name: "simnet",
                pubkey_hash_addr_id: [0x0e, 0x91],
                script_hash_addr_id: [0x0e, 0x6c],
            },
            Network::Regnet => ChainParams {
                name: "regnet",
                pubkey_hash_addr_id: [0x0e, 0x00],
                script_hash_addr_id: [0x0d, 0xdb],
            },
        }
    }
}
