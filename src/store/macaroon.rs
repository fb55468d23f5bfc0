//! Binary (v1 packet) encoding of macaroons as issued by the store.
//!
//! A serialized macaroon is a sequence of packets. Each packet is a 4-digit hex
//! length (covering the whole packet, header included) followed by
//! `<key> <value>\n`. Field order is fixed:
//!
//! ```text
//! location, identifier, (cid [, vid] [, cl])*, signature
//! ```
//!
//! Only what the credential workflow needs is supported: decode, inspect
//! caveats, re-encode. There is no signature verification or minting.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::errors::MacaroonError;

const HEADER_LEN: usize = 4;
const MAX_PACKET_LEN: usize = 0xffff;
const SIGNATURE_LEN: usize = 32;

const LOCATION: &str = "location";
const IDENTIFIER: &str = "identifier";
const CAVEAT_ID: &str = "cid";
const VERIFICATION_ID: &str = "vid";
const CAVEAT_LOCATION: &str = "cl";
const SIGNATURE: &str = "signature";

/// A condition attached to a macaroon. Third-party caveats carry a
/// verification id and the location of the service that discharges them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub id: Vec<u8>,
    pub verification_id: Option<Vec<u8>>,
    pub location: Option<String>,
}

impl Caveat {
    pub fn first_party(id: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            verification_id: None,
            location: None,
        }
    }

    pub fn third_party(
        id: impl Into<Vec<u8>>,
        verification_id: impl Into<Vec<u8>>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            verification_id: Some(verification_id.into()),
            location: Some(location.into()),
        }
    }

    /// The caveat id as text, which is how discharge endpoints expect it.
    pub fn id_str(&self) -> Result<&str, MacaroonError> {
        std::str::from_utf8(&self.id).map_err(|_| MacaroonError::InvalidUtf8("caveat id"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: Vec<u8>,
}

impl Macaroon {
    pub fn new(
        location: impl Into<String>,
        identifier: impl Into<Vec<u8>>,
        caveats: Vec<Caveat>,
        signature: [u8; SIGNATURE_LEN],
    ) -> Self {
        Self {
            location: location.into(),
            identifier: identifier.into(),
            caveats,
            signature: signature.to_vec(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// First caveat to be discharged by the service at `location`.
    pub fn third_party_caveat(&self, location: &str) -> Option<&Caveat> {
        self.caveats
            .iter()
            .find(|c| c.location.as_deref() == Some(location))
    }

    pub fn from_binary(data: &[u8]) -> Result<Self, MacaroonError> {
        let mut reader = PacketReader { data, pos: 0 };

        let location = reader.expect(LOCATION)?;
        let location = String::from_utf8(location.to_vec())
            .map_err(|_| MacaroonError::InvalidUtf8("location"))?;
        let identifier = reader.expect(IDENTIFIER)?.to_vec();

        let mut caveats: Vec<Caveat> = Vec::new();
        let signature = loop {
            let (key, value) = reader.next_packet()?;
            match key {
                CAVEAT_ID => caveats.push(Caveat::first_party(value)),
                VERIFICATION_ID => {
                    let caveat = caveats
                        .last_mut()
                        .ok_or_else(|| MacaroonError::OrphanCaveatField(key.to_string()))?;
                    caveat.verification_id = Some(value.to_vec());
                }
                CAVEAT_LOCATION => {
                    let caveat = caveats
                        .last_mut()
                        .ok_or_else(|| MacaroonError::OrphanCaveatField(key.to_string()))?;
                    let cl = String::from_utf8(value.to_vec())
                        .map_err(|_| MacaroonError::InvalidUtf8("caveat location"))?;
                    caveat.location = Some(cl);
                }
                SIGNATURE => break value.to_vec(),
                other => {
                    return Err(MacaroonError::UnexpectedField {
                        expected: SIGNATURE,
                        found: other.to_string(),
                    })
                }
            }
        };

        if signature.len() != SIGNATURE_LEN {
            return Err(MacaroonError::InvalidSignatureLength(signature.len()));
        }
        if reader.pos != data.len() {
            return Err(MacaroonError::TrailingData(reader.pos));
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, MacaroonError> {
        let mut out = Vec::new();
        write_packet(&mut out, LOCATION, self.location.as_bytes())?;
        write_packet(&mut out, IDENTIFIER, &self.identifier)?;
        for caveat in &self.caveats {
            write_packet(&mut out, CAVEAT_ID, &caveat.id)?;
            if let Some(vid) = &caveat.verification_id {
                write_packet(&mut out, VERIFICATION_ID, vid)?;
            }
            if let Some(cl) = &caveat.location {
                write_packet(&mut out, CAVEAT_LOCATION, cl.as_bytes())?;
            }
        }
        write_packet(&mut out, SIGNATURE, &self.signature)?;
        Ok(out)
    }

    /// Decodes the unpadded URL-safe base64 transport form. Padding is tolerated.
    pub fn from_base64(encoded: &str) -> Result<Self, MacaroonError> {
        let raw = URL_SAFE_NO_PAD.decode(encoded.trim().trim_end_matches('='))?;
        Self::from_binary(&raw)
    }

    pub fn to_base64(&self) -> Result<String, MacaroonError> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_binary()?))
    }
}

struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn next_packet(&mut self) -> Result<(&'a str, &'a [u8]), MacaroonError> {
        let data: &'a [u8] = self.data;
        let start = self.pos;
        let header = data
            .get(start..start + HEADER_LEN)
            .ok_or(MacaroonError::Truncated(start))?;
        let len_bytes = hex::decode(header).map_err(|_| MacaroonError::BadPacketHeader(start))?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if len <= HEADER_LEN {
            return Err(MacaroonError::BadPacketHeader(start));
        }

        let body = data
            .get(start + HEADER_LEN..start + len)
            .ok_or(MacaroonError::Truncated(start))?;
        let body = body
            .strip_suffix(b"\n")
            .ok_or(MacaroonError::MalformedPacket(start))?;
        let space = body
            .iter()
            .position(|b| *b == b' ')
            .ok_or(MacaroonError::MalformedPacket(start))?;

        let key = std::str::from_utf8(&body[..space])
            .map_err(|_| MacaroonError::MalformedPacket(start))?;
        self.pos = start + len;
        Ok((key, &body[space + 1..]))
    }

    fn expect(&mut self, expected: &'static str) -> Result<&'a [u8], MacaroonError> {
        let (key, value) = self.next_packet()?;
        if key != expected {
            return Err(MacaroonError::UnexpectedField {
                expected,
                found: key.to_string(),
            });
        }
        Ok(value)
    }
}

fn write_packet(out: &mut Vec<u8>, key: &str, value: &[u8]) -> Result<(), MacaroonError> {
    let len = HEADER_LEN + key.len() + 1 + value.len() + 1;
    if len > MAX_PACKET_LEN {
        return Err(MacaroonError::PacketTooLong(len));
    }
    out.extend_from_slice(hex::encode((len as u16).to_be_bytes()).as_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(b' ');
    out.extend_from_slice(value);
    out.push(b'\n');
    Ok(())
}
