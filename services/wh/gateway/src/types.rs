//! Link-level value types shared by requests and completion events.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest radio channel number
pub const MAX_CHANNEL: u8 = 16;

/// Connection SSID length handed to the gateway on join
pub const SSID_LENGTH: usize = 24;

/// Maximum key length accepted by the gateway
pub const MAX_KEY_LENGTH: usize = 20;

/// Magic number carried by a valid advertisement block
pub const GAME_INFO_MAGIC: u16 = 0x0001;

/// Highest association id a coordinator can hand out
pub const MAX_AID: u16 = 15;

/// Allowed-channel pattern meaning the radio library is not initialized
const RAW_CHANNELS_UNINITIALIZED: u16 = 0x8000;

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Wildcard address; as a filter it matches every peer
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// True for the wildcard address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Treat `self` as a filter and test `other` against it
    pub fn accepts(&self, other: &MacAddress) -> bool {
        self.is_broadcast() || self == other
    }

    /// Fold the address into a 64-bit value (used for seeding)
    pub fn to_u64(self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Set of association ids; bit 0 is the coordinator itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AidBitmap(pub u16);

impl AidBitmap {
    /// No bits at all
    pub const NONE: AidBitmap = AidBitmap(0);
    /// Coordinator only, no peers joined
    pub const PARENT_ONLY: AidBitmap = AidBitmap(1);

    /// Bitmap covering the coordinator and `max_children` peers
    pub fn all(max_children: u16) -> Self {
        let n = max_children.min(MAX_AID) + 1;
        AidBitmap(((1u32 << n) - 1) as u16)
    }

    /// Bitmap holding exactly one association id
    pub fn single(aid: u16) -> Self {
        if aid > MAX_AID {
            return Self::NONE;
        }
        AidBitmap(1 << aid)
    }

    /// Raw bits
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Check membership
    pub fn contains(self, aid: u16) -> bool {
        aid <= MAX_AID && self.0 & (1 << aid) != 0
    }

    /// Set the bit for `aid`
    pub fn insert(&mut self, aid: u16) {
        self.0 |= Self::single(aid).0;
    }

    /// Clear the bit for `aid`
    pub fn remove(&mut self, aid: u16) {
        self.0 &= !Self::single(aid).0;
    }

    /// Clear every bit in `other`
    pub fn remove_all(&mut self, other: AidBitmap) {
        self.0 &= !other.0;
    }

    /// Bits present in both
    pub fn intersection(self, other: AidBitmap) -> AidBitmap {
        AidBitmap(self.0 & other.0)
    }

    /// True when no bit is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when at least one peer (aid >= 1) is present
    pub fn has_peers(self) -> bool {
        self.0 & !1 != 0
    }

    /// Joined peer ids, ascending, coordinator excluded
    pub fn peers(self) -> impl Iterator<Item = u16> {
        (1..=MAX_AID).filter(move |aid| self.contains(*aid))
    }
}

impl fmt::Display for AidBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Set of radio channels; bit `n - 1` stands for channel `n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMask(pub u16);

impl ChannelMask {
    /// Empty mask
    pub const EMPTY: ChannelMask = ChannelMask(0);

    /// Check membership; out-of-range channels are never members
    pub fn contains(self, channel: u8) -> bool {
        (1..=MAX_CHANNEL).contains(&channel) && self.0 & (1 << (channel - 1)) != 0
    }

    /// Add a channel; out-of-range channels are ignored
    pub fn insert(&mut self, channel: u8) {
        if (1..=MAX_CHANNEL).contains(&channel) {
            self.0 |= 1 << (channel - 1);
        }
    }

    /// Number of channels in the mask
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True when empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Member channels, ascending
    pub fn channels(self) -> impl Iterator<Item = u8> {
        (1..=MAX_CHANNEL).filter(move |c| self.contains(*c))
    }

    /// The `index`-th member channel, ascending
    pub fn nth(self, index: usize) -> Option<u8> {
        self.channels().nth(index)
    }

    /// Lowest member strictly above `channel`, wrapping past the top
    pub fn next_after(self, channel: u8) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let mut c = channel;
        for _ in 0..MAX_CHANNEL {
            c = if c >= MAX_CHANNEL { 1 } else { c + 1 };
            if self.contains(c) {
                return Some(c);
            }
        }
        None
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Decoded allowed-channel pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedChannels {
    /// Radio library not initialized or otherwise unusable
    Uninitialized,
    /// No channel may be used here
    NoRadio,
    /// Usable channels
    Mask(ChannelMask),
}

impl AllowedChannels {
    /// Decode the gateway's raw pattern
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            RAW_CHANNELS_UNINITIALIZED => AllowedChannels::Uninitialized,
            0 => AllowedChannels::NoRadio,
            bits => AllowedChannels::Mask(ChannelMask(bits & 0x7fff)),
        }
    }
}

/// Received signal strength, coarse
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LinkLevel {
    /// No signal
    #[default]
    Level0 = 0,
    /// Weak
    Level1 = 1,
    /// Fair
    Level2 = 2,
    /// Strong
    Level3 = 3,
}

bitflags! {
    /// Attribute flags advertised in a beacon
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GameAttributes: u8 {
        /// Coordinator is accepting new peers
        const ENTRY = 1 << 0;
        /// Coordinator is delivering a boot program
        const MULTIBOOT = 1 << 1;
        /// Key sharing is active
        const KEY_SHARING = 1 << 2;
        /// Continuous send mode
        const CONTINUOUS_SEND = 1 << 3;
    }
}

/// Advertisement block carried in a beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    /// Must equal [`GAME_INFO_MAGIC`]
    pub magic: u16,
    /// Application identifier
    pub ggid: u32,
    /// Session identifier
    pub tgid: u16,
    /// Attribute flags
    pub attributes: GameAttributes,
    /// Currently joined peers
    pub peers: AidBitmap,
    /// Free-form user payload
    pub user_game_info: Bytes,
}

impl GameInfo {
    /// Advertisement block with the standard magic number
    pub fn new(ggid: u32, tgid: u16, attributes: GameAttributes) -> Self {
        Self {
            magic: GAME_INFO_MAGIC,
            ggid,
            tgid,
            attributes,
            peers: AidBitmap::PARENT_ONLY,
            user_game_info: Bytes::new(),
        }
    }

    /// Check the magic number
    pub fn is_valid(&self) -> bool {
        self.magic == GAME_INFO_MAGIC
    }
}

/// Everything the gateway reports about one discovered coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconDescriptor {
    /// Coordinator address
    pub bssid: MacAddress,
    /// Network name
    pub ssid: Bytes,
    /// Channel the beacon was heard on
    pub channel: u8,
    /// Beacon interval in milliseconds
    pub beacon_period: u16,
    /// Signal strength at reception
    pub link_level: LinkLevel,
    /// Advertisement block, absent for foreign networks
    pub game_info: Option<GameInfo>,
}

impl BeaconDescriptor {
    /// Advertisement block, when present and well formed
    pub fn valid_game_info(&self) -> Option<&GameInfo> {
        self.game_info.as_ref().filter(|info| info.is_valid())
    }
}

impl fmt::Display for BeaconDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bssid={} ssid={:?} channel={} beacon_period={} link={:?}",
            self.bssid, self.ssid, self.channel, self.beacon_period, self.link_level
        )?;
        match &self.game_info {
            Some(info) => write!(
                f,
                " ggid={:#010x} tgid={} attr={:?} peers={} user_len={}",
                info.ggid,
                info.tgid,
                info.attributes,
                info.peers,
                info.user_game_info.len()
            ),
            None => write!(f, " (no game info)"),
        }
    }
}

/// Coordinator parameters applied before starting the coordinator role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentParam {
    /// Application identifier
    pub ggid: u32,
    /// Session identifier
    pub tgid: u16,
    /// Radio channel
    pub channel: u8,
    /// Beacon interval in milliseconds
    pub beacon_period: u16,
    /// Maximum coordinator payload per cycle
    pub parent_max_size: u16,
    /// Maximum peer payload per cycle
    pub child_max_size: u16,
    /// Peer capacity
    pub max_entry: u16,
    /// Admit new peers
    pub entry_enabled: bool,
    /// Advertise key sharing
    pub key_sharing: bool,
    /// Advertise boot-program delivery
    pub multi_boot: bool,
    /// User payload advertised in the beacon
    pub user_game_info: Bytes,
}

/// One scan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParam {
    /// Channel to listen on
    pub channel: u8,
    /// Only report this coordinator (broadcast = any)
    pub bssid: MacAddress,
    /// Listen time in milliseconds
    pub scan_period: u16,
}

/// Key strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyMode {
    /// No encryption
    #[default]
    None,
    /// 40-bit key
    Bits40,
    /// 104-bit key
    Bits104,
    /// 128-bit key
    Bits128,
}

/// Key bytes plus strength, produced by a key generator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Key strength
    pub mode: KeyMode,
    /// Key bytes, at most [`MAX_KEY_LENGTH`]
    pub key: Bytes,
}

/// Authentication used when joining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// Open system
    OpenSystem,
    /// Shared key
    SharedKey,
}

/// Key-sharing table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeySet {
    /// Sequence number of the merge that produced this table
    pub sequence: u32,
    /// Which slots carry a key
    pub bitmap: AidBitmap,
    /// Per-aid key values, indexed by association id
    pub keys: Vec<u16>,
}

impl KeySet {
    /// Key contributed by `aid`
    pub fn key(&self, aid: u16) -> Option<u16> {
        if !self.bitmap.contains(aid) {
            return None;
        }
        self.keys.get(aid as usize).copied()
    }
}

/// One merged data-sharing table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataSet {
    /// Which slots received a contribution this cycle
    pub bitmap: AidBitmap,
    /// Per-aid contributions, indexed by association id
    pub slots: Vec<Option<Bytes>>,
}

impl DataSet {
    /// Contribution of `aid`, if present this cycle
    pub fn contribution(&self, aid: u16) -> Option<&Bytes> {
        if !self.bitmap.contains(aid) {
            return None;
        }
        self.slots.get(aid as usize).and_then(|slot| slot.as_ref())
    }
}
