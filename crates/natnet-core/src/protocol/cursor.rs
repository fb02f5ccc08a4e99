//! Bounds-checked sequential access to NatNet packet bytes.
//!
//! Every message codec is written against two small types:
//!
//! - [`ParseCursor`] – walks an immutable byte slice from front to back.
//! - [`PacketWriter`] – appends fields to a growable buffer.
//!
//! # Why a cursor instead of indexing? (for beginners)
//!
//! A NatNet frame is a long run of variable-length lists: a count, then
//! that many records, then another count.  Writing `&buf[offset..offset + 12]`
//! by hand for each field is how out-of-bounds panics creep in.  The cursor
//! centralises the single length check, so a short or corrupted datagram
//! always surfaces as [`ProtocolError::Truncated`] instead of a panic.
//!
//! All multi-byte values on the wire are little-endian.

use glam::{Quat, Vec3};

use crate::protocol::codec::ProtocolError;

// ── Reader ────────────────────────────────────────────────────────────────────

/// Reads fixed-width fields from a byte slice, advancing an internal offset.
#[derive(Debug, Clone)]
pub struct ParseCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ParseCursor<'a> {
    /// Creates a cursor positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Current read position, in bytes from the start of the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Consumes exactly `n` bytes and returns them as a sub-slice.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if fewer than `n` bytes remain.
    /// The offset is left unchanged in that case.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.remaining();
        if n > available {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed: n,
                available,
            });
        }
        let start = self.offset;
        self.offset += n;
        Ok(&self.buf[start..start + n])
    }

    /// Consumes exactly `N` bytes into an array.
    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_fixed::<1>()?[0])
    }

    /// Any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.read_fixed()?))
    }

    /// Reads three consecutive `f32` values as `(x, y, z)`.
    pub fn read_vec3(&mut self) -> Result<Vec3, ProtocolError> {
        let raw: [u8; 12] = self.read_fixed()?;
        Ok(Vec3::new(f32_at(&raw, 0), f32_at(&raw, 4), f32_at(&raw, 8)))
    }

    /// Reads four consecutive `f32` values as `(x, y, z, w)`.
    ///
    /// The quaternion is taken as-is; it is not normalised.
    pub fn read_quat(&mut self) -> Result<Quat, ProtocolError> {
        let raw: [u8; 16] = self.read_fixed()?;
        Ok(Quat::from_xyzw(
            f32_at(&raw, 0),
            f32_at(&raw, 4),
            f32_at(&raw, 8),
            f32_at(&raw, 12),
        ))
    }

    /// Reads a NUL-terminated string.
    ///
    /// With `Some(width)` the field occupies exactly `width` bytes and the
    /// value ends at the first NUL inside it (or at `width` if there is none).
    /// With `None` the value runs up to the next NUL, which is consumed too.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, since server-side names
    /// are user-entered.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the field is cut short or no
    /// terminating NUL exists before the end of the buffer.
    pub fn read_cstr(&mut self, width: Option<usize>) -> Result<String, ProtocolError> {
        match width {
            Some(width) => {
                let field = self.read_bytes(width)?;
                let end = field.iter().position(|&b| b == 0).unwrap_or(width);
                Ok(String::from_utf8_lossy(&field[..end]).into_owned())
            }
            None => {
                let rest = &self.buf[self.offset..];
                let end = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(ProtocolError::Truncated {
                        offset: self.offset,
                        needed: rest.len() + 1,
                        available: rest.len(),
                    })?;
                let value = String::from_utf8_lossy(&rest[..end]).into_owned();
                self.offset += end + 1;
                Ok(value)
            }
        }
    }

    /// Reads a `u32` element count followed by that many items.
    ///
    /// The count is checked against `remaining() / min_item_size` before any
    /// allocation, so a corrupted count cannot request gigabytes of memory.
    pub fn read_list<T>(
        &mut self,
        min_item_size: usize,
        mut read_item: impl FnMut(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        let count = self.read_u32()? as usize;
        let needed = count.saturating_mul(min_item_size);
        if needed > self.remaining() {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed,
                available: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }
}

fn f32_at(raw: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Appends wire fields to an owned buffer; the mirror image of [`ParseCursor`].
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    /// Writes a list length as the `u32` count prefix used throughout the protocol.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if `len` does not fit in a `u32`.
    pub fn write_count(&mut self, len: usize) -> Result<(), ProtocolError> {
        let count = u32::try_from(len)
            .map_err(|_| ProtocolError::Malformed(format!("list of {len} items is too long")))?;
        self.write_u32(count);
        Ok(())
    }

    /// Writes `value` followed by a terminating NUL.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if `value` contains an interior NUL,
    /// which would make the field unreadable.
    pub fn write_cstr(&mut self, value: &str) -> Result<(), ProtocolError> {
        reject_interior_nul(value)?;
        self.write_bytes(value.as_bytes());
        self.write_u8(0);
        Ok(())
    }

    /// Writes `value` into a field of exactly `width` bytes, NUL-padded.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if `value` is longer than `width`
    /// or contains an interior NUL.
    pub fn write_fixed_str(&mut self, value: &str, width: usize) -> Result<(), ProtocolError> {
        reject_interior_nul(value)?;
        let bytes = value.as_bytes();
        if bytes.len() > width {
            return Err(ProtocolError::Malformed(format!(
                "string of {} bytes does not fit a {width}-byte field",
                bytes.len()
            )));
        }
        self.write_bytes(bytes);
        self.buf.resize(self.buf.len() + (width - bytes.len()), 0);
        Ok(())
    }
}

fn reject_interior_nul(value: &str) -> Result<(), ProtocolError> {
    if value.as_bytes().contains(&0) {
        return Err(ProtocolError::Malformed(format!(
            "string {value:?} contains a NUL byte"
        )));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
