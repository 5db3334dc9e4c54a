use std::mem::size_of;

use crate::string_registry::register_string;

/// Wire tag identifying the kind of a logged field.
///
/// Widths of `Isize`, `Usize`, the `Str` length prefix and `Literal`
/// addresses follow the writer's native bit width, recorded in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    I8 = b'1',
    I16 = b'2',
    I32 = b'4',
    I64 = b'8',
    Isize = b'i',
    U8 = b'!',
    U16 = b'@',
    U32 = b'$',
    U64 = b'*',
    Usize = b'I',
    F32 = b'f',
    F64 = b'F',
    Bool = b'b',
    Str = b's',
    Literal = b'S',
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let tag = match byte {
            b'1' => Tag::I8,
            b'2' => Tag::I16,
            b'4' => Tag::I32,
            b'8' => Tag::I64,
            b'i' => Tag::Isize,
            b'!' => Tag::U8,
            b'@' => Tag::U16,
            b'$' => Tag::U32,
            b'*' => Tag::U64,
            b'I' => Tag::Usize,
            b'f' => Tag::F32,
            b'F' => Tag::F64,
            b'b' => Tag::Bool,
            b's' => Tag::Str,
            b'S' => Tag::Literal,
            _ => return None,
        };
        Some(tag)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A value that can be written as one field of a log record.
///
/// The set of implementations is closed: fixed-width integers, native-width
/// integers, floats, `bool`, inline strings and interned [`Literal`]s.
pub trait Loggable {
    fn log_tag(&self) -> Tag;

    /// Bytes [`log_into`](Self::log_into) will write.
    fn log_size(&self) -> usize;

    /// Encodes the value into `buf`, which is exactly `log_size()` bytes long.
    fn log_into(&self, buf: &mut [u8]);
}

macro_rules! trivially_loggable {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Loggable for $ty {
                #[inline]
                fn log_tag(&self) -> Tag {
                    Tag::$tag
                }

                #[inline]
                fn log_size(&self) -> usize {
                    size_of::<$ty>()
                }

                #[inline]
                fn log_into(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

trivially_loggable! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => Usize,
    f32 => F32,
    f64 => F64,
}

impl Loggable for bool {
    fn log_tag(&self) -> Tag {
        Tag::Bool
    }

    fn log_size(&self) -> usize {
        1
    }

    fn log_into(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }
}

impl Loggable for str {
    fn log_tag(&self) -> Tag {
        Tag::Str
    }

    fn log_size(&self) -> usize {
        size_of::<usize>() + self.len()
    }

    fn log_into(&self, buf: &mut [u8]) {
        let (len, bytes) = buf.split_at_mut(size_of::<usize>());
        len.copy_from_slice(&self.len().to_le_bytes());
        bytes.copy_from_slice(self.as_bytes());
    }
}

impl Loggable for String {
    fn log_tag(&self) -> Tag {
        Tag::Str
    }

    fn log_size(&self) -> usize {
        self.as_str().log_size()
    }

    fn log_into(&self, buf: &mut [u8]) {
        self.as_str().log_into(buf)
    }
}

impl<T: Loggable + ?Sized> Loggable for &T {
    fn log_tag(&self) -> Tag {
        (**self).log_tag()
    }

    fn log_size(&self) -> usize {
        (**self).log_size()
    }

    fn log_into(&self, buf: &mut [u8]) {
        (**self).log_into(buf)
    }
}

/// Reference to interned text, logged as its address rather than its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Literal {
    address: u64,
}

impl Literal {
    /// Interns `text` (once per distinct string) and refers to it.
    pub fn new(text: &str) -> Self {
        Self {
            address: register_string(text),
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }
}

impl Loggable for Literal {
    fn log_tag(&self) -> Tag {
        Tag::Literal
    }

    fn log_size(&self) -> usize {
        size_of::<usize>()
    }

    fn log_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&(self.address as usize).to_le_bytes());
    }
}

/// Most fields a single record can carry; the count is stored in one byte.
pub const MAX_FIELDS: usize = u8::MAX as usize;

/// Writes a field section: `[count:u8][tag per field][payload per field]`.
///
/// Fields are pushed one by one in declaration order; the writer places each
/// tag and payload at the right spot of a span sized with [`section_size`].
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    count: usize,
    index: usize,
    offset: usize,
}

impl<'a> FieldWriter<'a> {
    /// Starts a section of `count` fields at the front of `buf`.
    pub fn new(buf: &'a mut [u8], count: u8) -> Self {
        buf[0] = count;
        Self {
            buf,
            count: usize::from(count),
            index: 0,
            offset: header_size(usize::from(count)),
        }
    }

    pub fn push(&mut self, value: &dyn Loggable) {
        debug_assert!(self.index < self.count, "more fields than declared");
        let size = value.log_size();
        self.buf[1 + self.index] = value.log_tag().as_byte();
        value.log_into(&mut self.buf[self.offset..self.offset + size]);
        self.index += 1;
        self.offset += size;
    }

    /// Bytes written so far, header included.
    pub fn written(&self) -> usize {
        self.offset
    }
}

/// Bytes taken by the count and tag bytes of `count` fields.
pub fn header_size(count: usize) -> usize {
    1 + count
}

/// Total bytes of a field section holding `fields`.
pub fn section_size<'a, I>(fields: I) -> usize
where
    I: IntoIterator<Item = &'a dyn Loggable>,
{
    let mut count = 0;
    let mut body = 0;
    for field in fields {
        count += 1;
        body += field.log_size();
    }
    header_size(count) + body
}
