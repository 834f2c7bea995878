//! Init data parsing.
//!
//! Turns the init data handed to session creation into the list of key ids a
//! license request should name. Supported init data types:
//! - `cenc`: one or more concatenated ISO-BMFF `pssh` boxes. Key ids come from
//!   version 1 boxes carrying the Common system id.
//! - `keyids`: `{"kids":[...]}` JSON.
//! - `webm`: the init data is itself a single key id.
use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::config::CdmConfig;
use crate::error::{Error, Result};
use crate::jwk;

/// Common system id (W3C "Common PSSH box format").
pub const COMMON_SYSTEM_ID: Uuid = Uuid::from_u128(0x1077efecc0b24d02ace33c1e52e2fb4b);

/// Size of a key id inside a `pssh` box.
pub const PSSH_KEY_ID_SIZE: usize = 16;

const PSSH_BOX_TYPE: &[u8; 4] = b"pssh";
const BOX_HEADER_SIZE: usize = 8;

/// Registered EME init data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDataType {
    Cenc,
    KeyIds,
    WebM,
}

impl InitDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            InitDataType::Cenc => "cenc",
            InitDataType::KeyIds => "keyids",
            InitDataType::WebM => "webm",
        }
    }
}

impl fmt::Display for InitDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitDataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cenc" => Ok(InitDataType::Cenc),
            "keyids" => Ok(InitDataType::KeyIds),
            "webm" => Ok(InitDataType::WebM),
            other => Err(Error::InvalidInitData(format!(
                "Unsupported init data type: {}",
                other
            ))),
        }
    }
}

/// A parsed `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    pub flags: u32,
    pub system_id: Uuid,
    pub key_ids: Vec<[u8; PSSH_KEY_ID_SIZE]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Create a box; version 1 when key ids are given, version 0 otherwise.
    pub fn new(system_id: Uuid, key_ids: Vec<[u8; PSSH_KEY_ID_SIZE]>, data: Vec<u8>) -> Self {
        Self {
            version: if key_ids.is_empty() { 0 } else { 1 },
            flags: 0,
            system_id,
            key_ids,
            data,
        }
    }

    /// Serialize as a full box with a 32-bit size header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(self.version);
        body.extend_from_slice(&self.flags.to_be_bytes()[1..]);
        body.extend_from_slice(self.system_id.as_bytes());

        if self.version == 1 {
            body.extend_from_slice(&(self.key_ids.len() as u32).to_be_bytes());
            for kid in self.key_ids.iter() {
                body.extend_from_slice(kid);
            }
        }

        body.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        body.extend_from_slice(&self.data);

        let size = (body.len() + BOX_HEADER_SIZE) as u32;
        let mut out = Vec::with_capacity(body.len() + BOX_HEADER_SIZE);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(PSSH_BOX_TYPE);
        out.extend_from_slice(&body);
        out
    }

    /// Parse one or more concatenated boxes. Every box must be well formed.
    pub fn parse_all(data: &[u8]) -> Result<Vec<Self>> {
        if data.is_empty() {
            return Err(Error::InvalidInitData("No pssh boxes".to_string()));
        }

        let mut boxes = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (pssh, consumed) = parse_pssh_box(rest)?;
            boxes.push(pssh);
            rest = &rest[consumed..];
        }
        Ok(boxes)
    }
}

/// Parse a single box at the start of `data`, returning it and its size.
fn parse_pssh_box(data: &[u8]) -> Result<(PsshBox, usize)> {
    let mut reader = Reader::new(data);

    let size = reader.read_u32()? as u64;
    let box_type = reader.read_bytes(4)?;
    if box_type != PSSH_BOX_TYPE {
        return Err(Error::InvalidInitData("Not a pssh box".to_string()));
    }

    let box_size = match size {
        0 => data.len() as u64,
        1 => reader.read_u64()?,
        n => n,
    };
    if box_size > data.len() as u64 || box_size < reader.offset as u64 {
        return Err(Error::InvalidInitData(format!(
            "pssh box size {} is invalid for {} bytes",
            box_size,
            data.len()
        )));
    }
    let box_size = box_size as usize;
    let mut reader = Reader::new(&data[..box_size]).skip(reader.offset)?;

    let version = reader.read_u8()?;
    if version > 1 {
        return Err(Error::InvalidInitData(format!(
            "Unsupported pssh version {}",
            version
        )));
    }
    let flags = BigEndian::read_u24(reader.read_bytes(3)?);

    let system_id = Uuid::from_slice(reader.read_bytes(16)?)
        .map_err(|_| Error::InvalidInitData("Invalid system ID".to_string()))?;

    let mut key_ids = Vec::new();
    if version == 1 {
        let kid_count = reader.read_u32()? as usize;
        if kid_count > reader.remaining() / PSSH_KEY_ID_SIZE {
            return Err(Error::InvalidInitData("Missing KIDs".to_string()));
        }
        for _ in 0..kid_count {
            let mut kid = [0u8; PSSH_KEY_ID_SIZE];
            kid.copy_from_slice(reader.read_bytes(PSSH_KEY_ID_SIZE)?);
            key_ids.push(kid);
        }
    }

    let data_size = reader.read_u32()? as usize;
    let payload = reader.read_bytes(data_size)?.to_vec();
    if reader.remaining() != 0 {
        return Err(Error::InvalidInitData(
            "Trailing bytes inside pssh box".to_string(),
        ));
    }

    Ok((
        PsshBox {
            version,
            flags,
            system_id,
            key_ids,
            data: payload,
        },
        box_size,
    ))
}

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn skip(mut self, count: usize) -> Result<Self> {
        self.read_bytes(count)?;
        Ok(self)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(Error::InvalidInitData("pssh box truncated".to_string()));
        }
        let data = self.data;
        let bytes = &data[self.offset..self.offset + count];
        self.offset += count;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }
}

/// Collect key ids from every Common-system version 1 box in `data`.
///
/// Fails if any box is malformed or no Common-system box names a key id.
pub fn key_ids_for_common_system_id(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let key_ids: Vec<Vec<u8>> = PsshBox::parse_all(data)?
        .into_iter()
        .filter(|pssh| pssh.system_id == COMMON_SYSTEM_ID && pssh.version == 1)
        .flat_map(|pssh| pssh.key_ids)
        .map(|kid| kid.to_vec())
        .collect();

    if key_ids.is_empty() {
        return Err(Error::InvalidInitData(
            "No supported PSSH box found".to_string(),
        ));
    }
    Ok(key_ids)
}

/// Extract the key ids named by `init_data`.
pub fn extract_key_ids(
    init_data_type: InitDataType,
    init_data: &[u8],
    config: &CdmConfig,
) -> Result<Vec<Vec<u8>>> {
    if init_data.is_empty() {
        return Err(Error::InvalidInitData("Init data is empty".to_string()));
    }
    if init_data.len() > config.max_init_data_length {
        return Err(Error::InvalidInitData(format!(
            "Init data is too long ({} > {})",
            init_data.len(),
            config.max_init_data_length
        )));
    }

    match init_data_type {
        InitDataType::Cenc => key_ids_for_common_system_id(init_data),
        InitDataType::KeyIds => {
            jwk::extract_key_ids_from_key_ids_init_data(init_data, config.max_key_id_length)
        }
        InitDataType::WebM => {
            if init_data.len() > config.max_key_id_length {
                return Err(Error::InvalidInitData(format!(
                    "WebM key id is too long ({} bytes)",
                    init_data.len()
                )));
            }
            Ok(vec![init_data.to_vec()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        extract_key_ids, key_ids_for_common_system_id, InitDataType, PsshBox, COMMON_SYSTEM_ID,
    };
    use crate::config::CdmConfig;
    use crate::jwk;
    use uuid::Uuid;

    const WIDEVINE_SYSTEM_ID: Uuid = Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed);

    #[test]
    fn pssh_roundtrip_v1() {
        let pssh = PsshBox::new(COMMON_SYSTEM_ID, vec![[0x11; 16], [0x22; 16]], vec![]);
        let bytes = pssh.to_bytes();
        assert_eq!(&bytes[4..8], b"pssh");
        assert_eq!(bytes.len(), 8 + 4 + 16 + 4 + 32 + 4);

        let parsed = PsshBox::parse_all(&bytes).expect("parse pssh");
        assert_eq!(parsed, vec![pssh]);
    }

    #[test]
    fn common_key_ids_from_concatenated_boxes() {
        let mut data = PsshBox::new(WIDEVINE_SYSTEM_ID, vec![], b"opaque".to_vec()).to_bytes();
        data.extend(PsshBox::new(COMMON_SYSTEM_ID, vec![[0x01; 16]], vec![]).to_bytes());
        data.extend(PsshBox::new(COMMON_SYSTEM_ID, vec![[0x02; 16]], vec![]).to_bytes());

        let ids = key_ids_for_common_system_id(&data).expect("key ids");
        assert_eq!(ids, vec![vec![0x01; 16], vec![0x02; 16]]);
    }

    #[test]
    fn no_common_box_is_error() {
        let data = PsshBox::new(WIDEVINE_SYSTEM_ID, vec![[0x01; 16]], vec![]).to_bytes();
        let err = key_ids_for_common_system_id(&data).expect_err("no common box");
        assert!(err.to_string().contains("No supported PSSH box"));
    }

    #[test]
    fn malformed_boxes_are_rejected() {
        let good = PsshBox::new(COMMON_SYSTEM_ID, vec![[0x01; 16]], vec![]).to_bytes();

        let mut truncated = good.clone();
        truncated.pop();
        assert!(PsshBox::parse_all(&truncated).is_err());

        let mut trailing_garbage = good.clone();
        trailing_garbage.extend_from_slice(&[0, 0]);
        assert!(PsshBox::parse_all(&trailing_garbage).is_err());

        let mut huge_kid_count = good.clone();
        huge_kid_count[28..32].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(PsshBox::parse_all(&huge_kid_count).is_err());

        let mut bad_version = good;
        bad_version[8] = 2;
        assert!(PsshBox::parse_all(&bad_version).is_err());
    }

    #[test]
    fn largesize_header_is_supported() {
        let small = PsshBox::new(COMMON_SYSTEM_ID, vec![[0x07; 16]], vec![]).to_bytes();
        let mut large = Vec::new();
        large.extend_from_slice(&1u32.to_be_bytes());
        large.extend_from_slice(b"pssh");
        large.extend_from_slice(&((small.len() + 8) as u64).to_be_bytes());
        large.extend_from_slice(&small[8..]);

        let ids = key_ids_for_common_system_id(&large).expect("key ids");
        assert_eq!(ids, vec![vec![0x07; 16]]);
    }

    #[test]
    fn extract_by_init_data_type() {
        let config = CdmConfig::default();

        let keyids = jwk::create_key_ids_init_data(&[b"abc".to_vec()]);
        assert_eq!(
            extract_key_ids(InitDataType::KeyIds, &keyids, &config).expect("keyids"),
            vec![b"abc".to_vec()]
        );

        assert_eq!(
            extract_key_ids(InitDataType::WebM, b"raw-kid", &config).expect("webm"),
            vec![b"raw-kid".to_vec()]
        );

        assert!(extract_key_ids(InitDataType::WebM, &[], &config).is_err());
        assert!(extract_key_ids(InitDataType::WebM, &[0u8; 513], &config).is_err());

        let big = vec![0u8; config.max_init_data_length + 1];
        assert!(extract_key_ids(InitDataType::Cenc, &big, &config).is_err());
    }

    #[test]
    fn init_data_type_names() {
        assert_eq!("cenc".parse::<InitDataType>().expect("cenc"), InitDataType::Cenc);
        assert_eq!("keyids".parse::<InitDataType>().expect("keyids"), InitDataType::KeyIds);
        assert_eq!("WebM".parse::<InitDataType>().expect("webm"), InitDataType::WebM);
        assert!("mp4".parse::<InitDataType>().is_err());
    }
}
