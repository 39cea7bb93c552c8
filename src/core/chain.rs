//! Chain profiles
//!
//! Static description of every supported chain: which fork it belongs to,
//! which network parameters it uses, how inputs are signed and which block
//! explorers can be queried for it.

use bitcoin::NetworkKind;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Fork & Network
// =============================================================================

/// Chain lineage, decides signature hashing and address formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fork {
    Btc,
    Bch,
}

/// Network parameters shared by both forks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Prefix family for WIF keys and base58 addresses
    pub fn network_kind(&self) -> NetworkKind {
        match self {
            Network::Mainnet => NetworkKind::Main,
            Network::Testnet => NetworkKind::Test,
        }
    }

    /// Parameters `bitcoin` validates base58 addresses against
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        }
    }

    pub fn from_kind(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Main => Network::Mainnet,
            NetworkKind::Test => Network::Testnet,
        }
    }

    /// CashAddr human-readable prefix
    pub fn cashaddr_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "bitcoincash",
            Network::Testnet => "bchtest",
        }
    }

    /// Path segment used by bitcore-node style APIs
    pub fn api_name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

// =============================================================================
// Signature Hash Flags
// =============================================================================

bitflags! {
    /// Signature hash type appended to every signature
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SigHashFlags: u32 {
        const ALL = 0x01;
        const NONE = 0x02;
        const SINGLE = 0x03;
        /// Replay-protected digest used by Bitcoin Cash
        const FORKID = 0x40;
        const ANYONECANPAY = 0x80;
    }
}

impl SigHashFlags {
    /// Whether the fork-aware (BIP-143 style) digest must be used
    pub fn uses_forkid(&self) -> bool {
        self.contains(SigHashFlags::FORKID)
    }

    /// Base type without the FORKID and ANYONECANPAY modifiers
    pub fn base_type(&self) -> u32 {
        self.bits() & 0x1f
    }

    /// The byte appended to a DER signature
    pub fn sighash_byte(&self) -> u8 {
        (self.bits() & 0xff) as u8
    }
}

// =============================================================================
// Explorer Descriptors
// =============================================================================

bitflags! {
    /// Operations an explorer supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const USD_RATE = 0b0000_0001;
        const UTXOS = 0b0000_0010;
        const FEE_RATES = 0b0000_0100;
        const BROADCAST = 0b0000_1000;
        const BALANCE = 0b0001_0000;
    }
}

/// Which API dialect an explorer speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerFamily {
    /// Insight API (`/api/addr/{address}/utxo`)
    Insight,
    /// bitcore-node v8 API (`/api/{CHAIN}/{network}/address/{address}/?unspent=true`)
    Bitcore,
    /// rest.bitcoin.com (`/v2/address/utxo/{address}`)
    BitcoinComRest,
}

/// Address encoding an explorer expects in request paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFormat {
    Legacy,
    CashAddr,
}

/// Static description of one block explorer endpoint
#[derive(Debug, Clone, Copy)]
pub struct ExplorerDescriptor {
    pub url: &'static str,
    pub family: ExplorerFamily,
    pub address_format: AddressFormat,
    pub capabilities: Capabilities,
}

const INSIGHT_CAPS: Capabilities = Capabilities::USD_RATE
    .union(Capabilities::UTXOS)
    .union(Capabilities::FEE_RATES)
    .union(Capabilities::BROADCAST)
    .union(Capabilities::BALANCE);

const BITCORE_CAPS: Capabilities = Capabilities::UTXOS
    .union(Capabilities::FEE_RATES)
    .union(Capabilities::BROADCAST)
    .union(Capabilities::BALANCE);

const REST_CAPS: Capabilities = Capabilities::UTXOS
    .union(Capabilities::BROADCAST)
    .union(Capabilities::BALANCE);

const fn insight(url: &'static str, address_format: AddressFormat) -> ExplorerDescriptor {
    ExplorerDescriptor {
        url,
        family: ExplorerFamily::Insight,
        address_format,
        capabilities: INSIGHT_CAPS,
    }
}

const fn bitcore(url: &'static str, address_format: AddressFormat) -> ExplorerDescriptor {
    ExplorerDescriptor {
        url,
        family: ExplorerFamily::Bitcore,
        address_format,
        capabilities: BITCORE_CAPS,
    }
}

const fn bitcoin_com_rest(url: &'static str) -> ExplorerDescriptor {
    ExplorerDescriptor {
        url,
        family: ExplorerFamily::BitcoinComRest,
        address_format: AddressFormat::CashAddr,
        capabilities: REST_CAPS,
    }
}

// =============================================================================
// Chain Profiles
// =============================================================================

/// Everything that differs between the supported chains
#[derive(Debug)]
pub struct ChainProfile {
    pub short_name: &'static str,
    pub long_name: &'static str,
    pub fork: Fork,
    pub network: Network,
    pub sighash_flags: SigHashFlags,
    pub explorers: &'static [ExplorerDescriptor],
}

impl ChainProfile {
    /// Ticker used when displaying amounts
    pub fn unit(&self) -> &'static str {
        match self.fork {
            Fork::Btc => "BTC",
            Fork::Bch => "BCH",
        }
    }

    /// Explorers declaring every capability in `needed`
    pub fn explorers_with(
        &self,
        needed: Capabilities,
    ) -> impl Iterator<Item = &'static ExplorerDescriptor> {
        self.explorers
            .iter()
            .filter(move |e| e.capabilities.contains(needed))
    }
}

impl fmt::Display for ChainProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.long_name, self.short_name)
    }
}

impl PartialEq for ChainProfile {
    fn eq(&self, other: &Self) -> bool {
        self.short_name == other.short_name
    }
}

impl Eq for ChainProfile {}

pub static BTC: ChainProfile = ChainProfile {
    short_name: "BTC",
    long_name: "Bitcoin",
    fork: Fork::Btc,
    network: Network::Mainnet,
    sighash_flags: SigHashFlags::ALL,
    explorers: &[
        insight("https://insight.bitpay.com", AddressFormat::Legacy),
        insight("https://btc.blockdozer.com", AddressFormat::Legacy),
        insight("https://blockexplorer.com", AddressFormat::Legacy),
        insight("https://insight.bitcoin.com", AddressFormat::Legacy),
        bitcore("https://api.bitcore.io", AddressFormat::Legacy),
    ],
};

pub static TBTC: ChainProfile = ChainProfile {
    short_name: "tBTC",
    long_name: "Bitcoin (testnet)",
    fork: Fork::Btc,
    network: Network::Testnet,
    sighash_flags: SigHashFlags::ALL,
    explorers: &[
        insight("https://test-insight.bitpay.com", AddressFormat::Legacy),
        insight("https://tbtc.blockdozer.com", AddressFormat::Legacy),
        insight("https://testnet.blockexplorer.com", AddressFormat::Legacy),
        bitcore("https://api.bitcore.io", AddressFormat::Legacy),
    ],
};

pub static BCH: ChainProfile = ChainProfile {
    short_name: "BCH",
    long_name: "Bitcoin Cash",
    fork: Fork::Bch,
    network: Network::Mainnet,
    sighash_flags: SigHashFlags::ALL.union(SigHashFlags::FORKID),
    explorers: &[
        insight("https://bch-insight.bitpay.com", AddressFormat::CashAddr),
        insight("https://bch.blockdozer.com", AddressFormat::CashAddr),
        insight("https://cashexplorer.bitcoin.com", AddressFormat::Legacy),
        bitcore("https://api.bitcore.io", AddressFormat::CashAddr),
        bitcoin_com_rest("https://rest.bitcoin.com"),
    ],
};

pub static TBCH: ChainProfile = ChainProfile {
    short_name: "tBCH",
    long_name: "Bitcoin Cash (testnet)",
    fork: Fork::Bch,
    network: Network::Testnet,
    sighash_flags: SigHashFlags::ALL.union(SigHashFlags::FORKID),
    explorers: &[
        insight("https://test-bch-insight.bitpay.com", AddressFormat::CashAddr),
        insight("https://tbch.blockdozer.com", AddressFormat::CashAddr),
        bitcore("https://api.bitcore.io", AddressFormat::CashAddr),
        bitcoin_com_rest("https://trest.bitcoin.com"),
    ],
};

/// All supported chains, mainnets first
pub static ALL_CHAINS: [&ChainProfile; 4] = [&BTC, &TBTC, &BCH, &TBCH];

/// Look up a chain by its short name (`BTC`, `tBTC`, `BCH`, `tBCH`)
pub fn chain_by_id(id: &str) -> Option<&'static ChainProfile> {
    ALL_CHAINS.iter().copied().find(|c| c.short_name == id)
}

/// The chain that shares `fork` and `network`
pub fn chain_for(fork: Fork, network: Network) -> &'static ChainProfile {
    match (fork, network) {
        (Fork::Btc, Network::Mainnet) => &BTC,
        (Fork::Btc, Network::Testnet) => &TBTC,
        (Fork::Bch, Network::Mainnet) => &BCH,
        (Fork::Bch, Network::Testnet) => &TBCH,
    }
}
