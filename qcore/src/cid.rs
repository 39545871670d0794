use bytes::BufMut;

/// The maximum length of a connection ID in QUIC v1.
pub const MAX_CID_SIZE: usize = 20;

/// A connection ID: 0 to 20 opaque bytes.
///
/// Endpoints must accept any length in that range from a peer.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    len: u8,
    bytes: [u8; MAX_CID_SIZE],
}

impl ConnectionId {
    pub fn from_slice(slice: &[u8]) -> Self {
        debug_assert!(slice.len() <= MAX_CID_SIZE);
        let mut bytes = [0; MAX_CID_SIZE];
        bytes[..slice.len()].copy_from_slice(slice);
        Self {
            len: slice.len() as u8,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for ConnectionId {
    fn as_ref(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl std::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cid(")?;
        for byte in self.as_ref() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Parse a length-prefixed connection ID,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn be_connection_id(input: &[u8]) -> nom::IResult<&[u8], ConnectionId> {
    use nom::{bytes::streaming::take, number::streaming::be_u8};
    let (remain, len) = be_u8(input)?;
    if len as usize > MAX_CID_SIZE {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (remain, bytes) = take(len as usize)(remain)?;
    Ok((remain, ConnectionId::from_slice(bytes)))
}

/// A [`bytes::BufMut`] extension trait for length-prefixed connection IDs.
pub trait WriteConnectionId {
    fn put_connection_id(&mut self, cid: &ConnectionId);
}

impl<T: BufMut> WriteConnectionId for T {
    fn put_connection_id(&mut self, cid: &ConnectionId) {
        self.put_u8(cid.len() as u8);
        self.put_slice(cid.as_ref());
    }
}
