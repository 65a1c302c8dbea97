use bytes::{Buf, BufMut};

/// An opaque row payload. On the log it serializes as
/// `int32 length | bytes`; the engine never copies a payload without going
/// through this format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of this tuple once serialized: the length prefix plus payload.
    pub fn serialized_size(&self) -> usize {
        4 + self.data.len()
    }

    pub fn serialize_into(&self, buf: &mut impl BufMut) {
        buf.put_i32_ne(self.data.len() as i32);
        buf.put_slice(&self.data);
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> Option<Tuple> {
        if buf.remaining() < 4 {
            return None;
        }
        let len = buf.get_i32_ne();
        if len < 0 || buf.remaining() < len as usize {
            return None;
        }
        let mut data = vec![0u8; len as usize];
        buf.copy_to_slice(&mut data);
        Some(Tuple { data })
    }
}

impl From<&[u8]> for Tuple {
    fn from(data: &[u8]) -> Self {
        Tuple {
            data: data.to_vec(),
        }
    }
}
