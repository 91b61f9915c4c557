//! Core seed types
//!
//! A seed describes one participant of the network: a fixed-length hash
//! identity plus an ordered bag of string properties. Seeds travel between
//! peers as single text lines, so the line codec lives here as well.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Length of a seed hash in characters (common hash length of the network)
pub const HASH_LENGTH: usize = 12;

/// Number of raw bytes encoded by a seed hash
pub const HASH_BYTES: usize = 9;

/// Maximum length of a peer name
pub const MAX_NAME_LENGTH: usize = 80;

/// Reserved alias that always resolves to the local peer
pub const LOCAL_PEER_ALIAS: &str = "localpeer";

/// Separator between hash and properties in a serialized seed line
pub const LINE_DELIMITER: char = '|';

/// Format used for the last-seen timestamp property
pub const LAST_SEEN_FORMAT: &str = "%Y%m%d%H%M%S";

/// Property bag of a seed, ordered by property name
pub type Properties = BTreeMap<String, String>;

// =============================================================================
// PROPERTY NAMES
// =============================================================================

/// Well-known seed property names
pub mod fields {
    pub const NAME: &str = "Name";
    pub const IP: &str = "IP";
    pub const PORT: &str = "Port";
    pub const VERSION: &str = "Version";
    pub const PEER_TYPE: &str = "PeerType";
    /// Uptime in minutes
    pub const UPTIME: &str = "Uptime";
    /// Number of stored URLs
    pub const URL_COUNT: &str = "LCount";
    /// Number of index entries
    pub const INDEX_COUNT: &str = "ICount";
    /// Indexing speed (pages per minute)
    pub const INDEX_SPEED: &str = "ISpeed";
    /// Query speed (queries per minute)
    pub const QUERY_SPEED: &str = "RSpeed";
    pub const LAST_SEEN: &str = "LastSeen";

    /// Fields a table can be listed by
    pub const SORT_FIELDS: [&str; 5] = [URL_COUNT, INDEX_COUNT, UPTIME, VERSION, LAST_SEEN];

    /// Fields summed by the table accumulators
    pub const SUM_FIELDS: [&str; 3] = [URL_COUNT, INDEX_COUNT, INDEX_SPEED];

    /// Fields averaged by the table accumulators
    pub const MEAN_FIELDS: [&str; 1] = [QUERY_SPEED];
}

// =============================================================================
// SEED HASH
// =============================================================================

/// Peer identity: 12 characters of the URL-safe base64 alphabet.
///
/// Internally each character is kept as its position in the alphabet
/// (`A-Z a-z 0-9 - _`), so the derived ordering is the network's canonical
/// ordering and the raw array doubles as the storage key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeedHash([u8; HASH_LENGTH]);

impl SeedHash {
    /// Parse a base64 hash string
    pub fn parse(s: &str) -> Result<Self, SeedParseError> {
        let bytes = s.as_bytes();
        if bytes.len() != HASH_LENGTH {
            return Err(SeedParseError::HashLength(bytes.len()));
        }
        let mut cardinals = [0u8; HASH_LENGTH];
        for (slot, &c) in cardinals.iter_mut().zip(bytes) {
            *slot = alphabet_index(c).ok_or(SeedParseError::HashCharacter(c as char))?;
        }
        Ok(Self(cardinals))
    }

    /// Encode raw hash bytes
    pub fn from_bytes(bytes: [u8; HASH_BYTES]) -> Self {
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        let mut cardinals = [0u8; HASH_LENGTH];
        for (slot, c) in cardinals.iter_mut().zip(encoded.bytes()) {
            // base64 output only contains alphabet characters
            *slot = alphabet_index(c).unwrap_or(0);
        }
        Self(cardinals)
    }

    /// Generate a fresh random identity
    pub fn random() -> Self {
        Self::from_bytes(rand::random::<[u8; HASH_BYTES]>())
    }

    /// Parse a hexadecimal rendering of the hash bytes
    pub fn from_hex(s: &str) -> Result<Self, SeedParseError> {
        let decoded = hex::decode(s).map_err(|e| SeedParseError::Hex(e.to_string()))?;
        let bytes: [u8; HASH_BYTES] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| SeedParseError::Hex(format!("expected {} bytes, got {}", HASH_BYTES, v.len())))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Raw hash bytes
    pub fn to_bytes(&self) -> [u8; HASH_BYTES] {
        let mut bytes = [0u8; HASH_BYTES];
        // 12 sextets pack into exactly 9 bytes
        for (chunk, out) in self.0.chunks(4).zip(bytes.chunks_mut(3)) {
            let n = (u32::from(chunk[0]) << 18)
                | (u32::from(chunk[1]) << 12)
                | (u32::from(chunk[2]) << 6)
                | u32::from(chunk[3]);
            out[0] = (n >> 16) as u8;
            out[1] = (n >> 8) as u8;
            out[2] = n as u8;
        }
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Storage key (alphabet positions, sorts canonically as bytes)
    pub fn as_key(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild a hash from a storage key; `None` for malformed keys
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let cardinals: [u8; HASH_LENGTH] = key.try_into().ok()?;
        if cardinals.iter().any(|&c| c >= 64) {
            return None;
        }
        Some(Self(cardinals))
    }

    /// Big-endian value of the leading 8 hash bytes
    pub fn leading_u64(&self) -> u64 {
        let bytes = self.to_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        u64::from_be_bytes(head)
    }
}

fn alphabet_index(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

fn alphabet_char(index: u8) -> char {
    let c = match index {
        0..=25 => b'A' + index,
        26..=51 => b'a' + (index - 26),
        52..=61 => b'0' + (index - 52),
        62 => b'-',
        _ => b'_',
    };
    c as char
}

impl fmt::Display for SeedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in &self.0 {
            write!(f, "{}", alphabet_char(c))?;
        }
        Ok(())
    }
}

impl fmt::Debug for SeedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedHash({})", self)
    }
}

impl FromStr for SeedHash {
    type Err = SeedParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SeedHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SeedHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PEER TYPE
// =============================================================================

/// Role a peer announces in its seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerType {
    /// Never connected to the network yet
    Virgin,
    /// Cannot be reached from outside (restricted)
    Junior,
    /// Reachable peer
    Senior,
    /// Reachable peer that also publishes a seed list
    Principal,
}

impl PeerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerType::Virgin => "virgin",
            PeerType::Junior => "junior",
            PeerType::Senior => "senior",
            PeerType::Principal => "principal",
        }
    }
}

impl FromStr for PeerType {
    type Err = SeedParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "virgin" => Ok(PeerType::Virgin),
            "junior" => Ok(PeerType::Junior),
            "senior" => Ok(PeerType::Senior),
            "principal" => Ok(PeerType::Principal),
            other => Err(SeedParseError::PeerType(other.to_string())),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to decode a hash or a serialized seed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeedParseError {
    #[error("hash must be 12 characters, got {0}")]
    HashLength(usize),

    #[error("invalid hash character '{0}'")]
    HashCharacter(char),

    #[error("invalid hex hash: {0}")]
    Hex(String),

    #[error("unknown peer type '{0}'")]
    PeerType(String),

    #[error("seed line has no '|' delimiter")]
    MissingDelimiter,

    #[error("malformed property '{0}'")]
    MalformedProperty(String),

    #[error("dangling escape at end of seed line")]
    DanglingEscape,
}

/// Reason a seed is refused by the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImproperReason {
    #[error("seed has no name")]
    MissingName,

    #[error("seed name '{0}' is malformed")]
    MalformedName(String),

    #[error("seed name '{0}' is reserved")]
    ReservedName(String),

    #[error("seed has no IP")]
    MissingIp,

    #[error("seed IP '{0}' is malformed")]
    MalformedIp(String),

    #[error("seed port '{0}' is invalid")]
    BadPort(String),

    #[error("seed carries the hash of the local peer")]
    OwnIdentity,
}

// =============================================================================
// SEED
// =============================================================================

/// A peer record: immutable hash plus mutable property bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    hash: SeedHash,
    properties: Properties,
}

impl Seed {
    pub fn new(hash: SeedHash) -> Self {
        Self {
            hash,
            properties: Properties::new(),
        }
    }

    pub fn with_properties(hash: SeedHash, properties: Properties) -> Self {
        Self { hash, properties }
    }

    /// Create the seed of a freshly generated local identity
    pub fn generate_local(name: Option<&str>, port: u16, version: &str) -> Self {
        let hash = SeedHash::random();
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("peer-{}", &hash.to_hex()[..8]),
        };

        let mut seed = Self::new(hash);
        seed.put(fields::NAME, name);
        seed.put(fields::IP, "");
        seed.put(fields::PORT, port.to_string());
        seed.put(fields::VERSION, version);
        seed.set_peer_type(PeerType::Virgin);
        seed.put(fields::UPTIME, "0");
        seed.put(fields::URL_COUNT, "0");
        seed.put(fields::INDEX_COUNT, "0");
        seed.put(fields::INDEX_SPEED, "0");
        seed.put(fields::QUERY_SPEED, "0.0");
        seed.touch();
        seed
    }

    pub fn hash(&self) -> SeedHash {
        self.hash
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn into_properties(self) -> Properties {
        self.properties
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: &str, value: impl Into<String>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn name(&self) -> &str {
        self.get(fields::NAME).unwrap_or("")
    }

    pub fn ip(&self) -> &str {
        self.get(fields::IP).unwrap_or("")
    }

    pub fn set_ip(&mut self, ip: &str) {
        self.put(fields::IP, ip);
    }

    pub fn port(&self) -> Option<u16> {
        self.get(fields::PORT)?.trim().parse().ok().filter(|&p| p > 0)
    }

    /// Protocol version, 0.0 when absent or unparsable
    pub fn version(&self) -> f64 {
        self.get(fields::VERSION)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0)
    }

    pub fn peer_type(&self) -> PeerType {
        self.get(fields::PEER_TYPE)
            .and_then(|t| t.parse().ok())
            .unwrap_or(PeerType::Virgin)
    }

    pub fn set_peer_type(&mut self, peer_type: PeerType) {
        self.put(fields::PEER_TYPE, peer_type.as_str());
    }

    pub fn is_junior(&self) -> bool {
        self.peer_type() == PeerType::Junior
    }

    /// Senior and principal peers are reachable from outside
    pub fn is_online(&self) -> bool {
        matches!(self.peer_type(), PeerType::Senior | PeerType::Principal)
    }

    pub fn url_count(&self) -> u64 {
        self.numeric(fields::URL_COUNT)
    }

    pub fn index_count(&self) -> u64 {
        self.numeric(fields::INDEX_COUNT)
    }

    pub fn uptime_minutes(&self) -> u64 {
        self.numeric(fields::UPTIME)
    }

    fn numeric(&self, key: &str) -> u64 {
        self.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(0)
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        let raw = self.get(fields::LAST_SEEN)?;
        NaiveDateTime::parse_from_str(raw, LAST_SEEN_FORMAT).ok()
    }

    /// Stamp the seed as seen now (UTC)
    pub fn touch(&mut self) {
        let now = Utc::now().format(LAST_SEEN_FORMAT).to_string();
        self.put(fields::LAST_SEEN, now);
    }

    /// Declared public address `ip:port`, if both parts are present
    pub fn public_address(&self) -> Option<String> {
        let ip = self.ip().trim();
        if ip.is_empty() {
            return None;
        }
        let port = self.port()?;
        if ip.contains(':') {
            Some(format!("[{}]:{}", ip, port))
        } else {
            Some(format!("{}:{}", ip, port))
        }
    }

    /// Gate every record has to pass before entering a table
    pub fn is_proper(&self) -> Result<(), ImproperReason> {
        let name = self.name();
        if name.is_empty() {
            return Err(ImproperReason::MissingName);
        }
        if name.len() > MAX_NAME_LENGTH
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ImproperReason::MalformedName(name.to_string()));
        }
        if name.eq_ignore_ascii_case(LOCAL_PEER_ALIAS) {
            return Err(ImproperReason::ReservedName(name.to_string()));
        }

        let ip = self.ip().trim();
        if ip.is_empty() {
            return Err(ImproperReason::MissingIp);
        }
        match ip.parse::<IpAddr>() {
            Ok(addr) if !addr.is_unspecified() => {}
            _ => return Err(ImproperReason::MalformedIp(ip.to_string())),
        }

        if self.port().is_none() {
            let raw = self.get(fields::PORT).unwrap_or("").to_string();
            return Err(ImproperReason::BadPort(raw));
        }

        Ok(())
    }

    /// Serialize as `<hash>|<key>=<value>,...`
    pub fn to_line(&self) -> String {
        let mut line = self.hash.to_string();
        line.push(LINE_DELIMITER);
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            escape_into(&mut line, key);
            line.push('=');
            escape_into(&mut line, value);
        }
        line
    }

    /// Parse a line produced by [`Seed::to_line`]
    pub fn from_line(line: &str) -> Result<Self, SeedParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (hash, body) = line
            .split_once(LINE_DELIMITER)
            .ok_or(SeedParseError::MissingDelimiter)?;
        let hash = SeedHash::parse(hash.trim())?;

        let mut properties = Properties::new();
        for pair in split_unescaped(body, ',')? {
            if pair.is_empty() {
                continue;
            }
            let parts = split_unescaped(&pair, '=')?;
            if parts.len() != 2 {
                return Err(SeedParseError::MalformedProperty(pair));
            }
            properties.insert(unescape(&parts[0])?, unescape(&parts[1])?);
        }

        Ok(Self { hash, properties })
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            '=' => out.push_str("\\="),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
}

/// Split on a separator that is not preceded by an escape; escapes are kept
fn split_unescaped(raw: &str, separator: char) -> Result<Vec<String>, SeedParseError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let next = chars.next().ok_or(SeedParseError::DanglingEscape)?;
            current.push('\\');
            current.push(next);
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    Ok(parts)
}

fn unescape(raw: &str) -> Result<String, SeedParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => return Err(SeedParseError::DanglingEscape),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn proper_seed(name: &str) -> Seed {
        let mut seed = Seed::new(SeedHash::parse("AAAAAAAAAAAA").unwrap());
        seed.put(fields::NAME, name);
        seed.put(fields::IP, "10.0.0.1");
        seed.put(fields::PORT, "8090");
        seed
    }

    #[test]
    fn test_hash_parse_and_display() {
        let hash = SeedHash::parse("Ab9-_zZ0aBcD").unwrap();
        assert_eq!(hash.to_string(), "Ab9-_zZ0aBcD");
        assert_eq!(SeedHash::parse("short"), Err(SeedParseError::HashLength(5)));
        assert_eq!(
            SeedHash::parse("AAAAAAAAAAA+"),
            Err(SeedParseError::HashCharacter('+'))
        );
    }

    #[test]
    fn test_canonical_order_is_not_ascii_order() {
        // ASCII puts digits before letters, the network alphabet puts them after
        let upper = SeedHash::parse("AAAAAAAAAAAA").unwrap();
        let lower = SeedHash::parse("aAAAAAAAAAAA").unwrap();
        let digit = SeedHash::parse("0AAAAAAAAAAA").unwrap();
        assert!(upper < lower);
        assert!(lower < digit);
        assert!("0AAAAAAAAAAA" < "AAAAAAAAAAAA");
    }

    #[test]
    fn test_hex_conversion() {
        let hash = SeedHash::from_bytes([0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3, 4]);
        let hex = hash.to_hex();
        assert_eq!(hex, "deadbeef0001020304");
        assert_eq!(SeedHash::from_hex(&hex).unwrap(), hash);
        assert!(SeedHash::from_hex("dead").is_err());
        assert!(SeedHash::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_key_roundtrip_rejects_malformed_keys() {
        let hash = SeedHash::random();
        assert_eq!(SeedHash::from_key(hash.as_key()), Some(hash));
        assert_eq!(SeedHash::from_key(b"short"), None);
        assert_eq!(SeedHash::from_key(&[200u8; HASH_LENGTH]), None);
    }

    #[test]
    fn test_is_proper_reasons() {
        assert!(proper_seed("alpha").is_proper().is_ok());

        assert_eq!(proper_seed("").is_proper(), Err(ImproperReason::MissingName));
        assert!(matches!(
            proper_seed("bad name").is_proper(),
            Err(ImproperReason::MalformedName(_))
        ));
        assert!(matches!(
            proper_seed("LocalPeer").is_proper(),
            Err(ImproperReason::ReservedName(_))
        ));

        let mut seed = proper_seed("alpha");
        seed.set_ip("");
        assert_eq!(seed.is_proper(), Err(ImproperReason::MissingIp));
        seed.set_ip("999.1.1.1");
        assert!(matches!(seed.is_proper(), Err(ImproperReason::MalformedIp(_))));
        seed.set_ip("0.0.0.0");
        assert!(matches!(seed.is_proper(), Err(ImproperReason::MalformedIp(_))));

        let mut seed = proper_seed("alpha");
        seed.put(fields::PORT, "0");
        assert!(matches!(seed.is_proper(), Err(ImproperReason::BadPort(_))));
    }

    #[test]
    fn test_public_address() {
        let mut seed = proper_seed("alpha");
        assert_eq!(seed.public_address().as_deref(), Some("10.0.0.1:8090"));
        seed.set_ip("::1");
        assert_eq!(seed.public_address().as_deref(), Some("[::1]:8090"));
        seed.set_ip("");
        assert_eq!(seed.public_address(), None);
    }

    #[test]
    fn test_line_codec_escapes_separators() {
        let mut seed = proper_seed("alpha");
        seed.put("Tags", "a,b=c\\d\r\n");
        let line = seed.to_line();
        assert!(line.starts_with("AAAAAAAAAAAA|"));
        assert!(!line.contains('\n'));
        assert_eq!(Seed::from_line(&line).unwrap(), seed);
    }

    #[test]
    fn test_line_codec_rejects_garbage() {
        assert_eq!(Seed::from_line("no delimiter"), Err(SeedParseError::MissingDelimiter));
        assert!(matches!(
            Seed::from_line("AAAAAAAAAAAA|Name"),
            Err(SeedParseError::MalformedProperty(_))
        ));
        assert_eq!(
            Seed::from_line("AAAAAAAAAAAA|Name=x\\"),
            Err(SeedParseError::DanglingEscape)
        );
    }

    #[test]
    fn test_generated_local_seed() {
        let seed = Seed::generate_local(None, 8090, "1.0");
        assert_eq!(seed.peer_type(), PeerType::Virgin);
        assert!(seed.name().starts_with("peer-"));
        assert_eq!(seed.port(), Some(8090));
        assert!(seed.last_seen().is_some());
        // no IP yet, so the local seed is not proper
        assert_eq!(seed.is_proper(), Err(ImproperReason::MissingIp));
    }

    proptest! {
        #[test]
        fn prop_hash_order_matches_byte_order(a in any::<[u8; 9]>(), b in any::<[u8; 9]>()) {
            let ha = SeedHash::from_bytes(a);
            let hb = SeedHash::from_bytes(b);
            prop_assert_eq!(ha.cmp(&hb), a.cmp(&b));
            prop_assert_eq!(ha.to_bytes(), a);
        }
    }
}
