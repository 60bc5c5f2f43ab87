use std::io::{Cursor, Read, Write};

use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::common::{LinkError, LinkResult};

/// A single playable item. The encoded blob is the canonical identity; the
/// metadata is derived from it and from REST responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Base64-encoded descriptor issued by the node.
    #[serde(alias = "track")]
    pub encoded: String,
    pub info: TrackInfo,
}

/// Metadata for a playable item.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    /// Playback position in milliseconds at encode time.
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Build a track from metadata, producing the encoded blob locally.
    pub fn from_info(info: TrackInfo) -> Self {
        let mut track = Self {
            encoded: String::new(),
            info,
        };
        track.encoded = track.encode();
        track
    }

    /// Encode the descriptor into its base64 wire form.
    ///
    /// Binary layout (big-endian throughout):
    ///   [u32 header: payload_size | (flags << 30)]
    ///     flags bit 0 = format byte follows
    ///   [u8  format = 2]
    ///   [utf title]
    ///   [utf author]
    ///   [u64 length ms]
    ///   [utf identifier]
    ///   [u8  is_stream: 0/1]
    ///   [u8 has_uri][utf uri if set]
    ///   [utf source_name]
    ///   [u64 position ms]
    ///
    /// Byte-for-byte field order and widths are a compatibility contract with
    /// the remote node's encoder.
    pub fn encode(&self) -> String {
        let mut msg_buf = Vec::new();
        msg_buf.write_u8(2).unwrap();

        write_utf(&mut msg_buf, &self.info.title);
        write_utf(&mut msg_buf, &self.info.author);
        msg_buf.write_u64::<BigEndian>(self.info.length).unwrap();
        write_utf(&mut msg_buf, &self.info.identifier);
        msg_buf
            .write_u8(if self.info.is_stream { 1 } else { 0 })
            .unwrap();

        match self.info.uri.as_deref() {
            Some(uri) => {
                msg_buf.write_u8(1).unwrap();
                write_utf(&mut msg_buf, uri);
            }
            None => msg_buf.write_u8(0).unwrap(),
        }

        write_utf(&mut msg_buf, &self.info.source_name);
        msg_buf.write_u64::<BigEndian>(self.info.position).unwrap();

        // Header: low 30 bits = payload size, high 2 bits = flags.
        let mut final_buf = Vec::new();
        let size = msg_buf.len() as u32;
        let flags: u32 = 1;
        final_buf
            .write_u32::<BigEndian>(size | (flags << 30))
            .unwrap();
        final_buf.extend_from_slice(&msg_buf);

        BASE64_STANDARD.encode(&final_buf)
    }

    /// Decode a descriptor from its base64 wire form.
    pub fn decode(encoded: &str) -> LinkResult<Self> {
        let data = BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| LinkError::MalformedTrack(format!("invalid base64: {e}")))?;
        if data.len() < 4 {
            return Err(LinkError::MalformedTrack(
                "descriptor shorter than its header".into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let header = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| malformed("header"))?;
        let flags = (header >> 30) & 0x03;

        // Bit 0 of flags gates the format byte. Its value is not interpreted
        // further; unknown formats share the field layout below.
        if (flags & 1) != 0 {
            cursor.read_u8().map_err(|_| malformed("format byte"))?;
        }

        let title = read_utf(&mut cursor, "title")?;
        let author = read_utf(&mut cursor, "author")?;
        let length = cursor
            .read_u64::<BigEndian>()
            .map_err(|_| malformed("length"))?;
        let identifier = read_utf(&mut cursor, "identifier")?;
        let is_stream = cursor.read_u8().map_err(|_| malformed("stream flag"))? != 0;

        let has_uri = cursor.read_u8().map_err(|_| malformed("uri flag"))? != 0;
        let uri = if has_uri {
            Some(read_utf(&mut cursor, "uri")?)
        } else {
            None
        };

        let source_name = read_utf(&mut cursor, "source name")?;
        let position = cursor
            .read_u64::<BigEndian>()
            .map_err(|_| malformed("position"))?;

        Ok(Self {
            encoded: encoded.to_string(),
            info: TrackInfo {
                identifier,
                is_seekable: !is_stream,
                author,
                length,
                is_stream,
                position,
                title,
                uri,
                source_name,
            },
        })
    }
}

fn malformed(what: &str) -> LinkError {
    LinkError::MalformedTrack(format!("truncated while reading {what}"))
}

fn write_utf(w: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    w.write_u16::<BigEndian>(bytes.len() as u16).unwrap();
    w.write_all(bytes).unwrap();
}

fn read_utf<R: Read>(r: &mut R, what: &str) -> LinkResult<String> {
    let len = r
        .read_u16::<BigEndian>()
        .map_err(|_| malformed(what))? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| malformed(what))?;
    String::from_utf8(buf)
        .map_err(|_| LinkError::MalformedTrack(format!("{what} is not valid utf-8")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
